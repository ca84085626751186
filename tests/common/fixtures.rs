//! In-memory CDX index served through wiremock

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use wiremock::{Request, Respond, ResponseTemplate};

const HEADER: &str = r#"["original","timestamp","statuscode","mimetype"]"#;
const TOKEN_PREFIX: &str = "com,example)/p";

/// Resume key the index hands out for `page` (spaces and commas exercise encoding)
pub fn resume_key(page: usize) -> String {
    format!("{TOKEN_PREFIX}{page} 20200101000000")
}

fn page_of(key: &str) -> usize {
    key.strip_prefix(TOKEN_PREFIX)
        .and_then(|rest| rest.split(' ').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| panic!("unexpected resume key {key:?}"))
}

/// A paginated index whose pages can be made to fail on demand
///
/// Page 0 is served without a resume key; page `n` answers `resume_key(n)`.
/// Clones share state, so a test can keep one and mount the other.
#[derive(Clone)]
pub struct CdxIndex {
    pages: Arc<Vec<Vec<String>>>,
    failures: Arc<Mutex<HashMap<usize, VecDeque<u16>>>>,
}

impl CdxIndex {
    /// `pages` pages of `per_page` distinct URLs under example.com
    pub fn new(pages: usize, per_page: usize) -> Self {
        let pages = (0..pages)
            .map(|p| {
                (0..per_page)
                    .map(|i| format!("http://sub{p}.example.com/item/{i}"))
                    .collect()
            })
            .collect();
        Self {
            pages: Arc::new(pages),
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Answer the next requests for `page` with these statuses, in order
    pub fn fail_page(&self, page: usize, statuses: &[u16]) {
        self.failures
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .extend(statuses);
    }

    /// Drop any failures still queued
    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Every URL in the index
    pub fn all_urls(&self) -> Vec<String> {
        self.pages.iter().flatten().cloned().collect()
    }

    fn body(&self, page: usize) -> String {
        let mut rows = vec![HEADER.to_string()];
        for (i, url) in self.pages[page].iter().enumerate() {
            // every third capture lacks status and mime
            if i % 3 == 2 {
                rows.push(format!(r#"["{url}","2020010100000{i}","-","-"]"#));
            } else {
                rows.push(format!(r#"["{url}","2020010100000{i}","200","text/html"]"#));
            }
        }
        if page + 1 < self.pages.len() {
            rows.push("[]".to_string());
            rows.push(format!(r#"["{}"]"#, resume_key(page + 1)));
        }
        format!("[{}]", rows.join(",\n"))
    }
}

impl Respond for CdxIndex {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let page = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "resumeKey")
            .map(|(_, v)| page_of(&v))
            .unwrap_or(0);

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&page)
            .and_then(VecDeque::pop_front);

        match failure {
            Some(status) => ResponseTemplate::new(status).set_body_string("Too Many Requests"),
            None => ResponseTemplate::new(200).set_body_string(self.body(page)),
        }
    }
}

/// The resume key a recorded request carried, if any
pub fn request_resume_key(request: &Request) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == "resumeKey")
        .map(|(_, v)| v.into_owned())
}
