mod close;
mod fetch_state;
