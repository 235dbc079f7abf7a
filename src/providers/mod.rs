pub mod fixed_feed;
pub mod oracle_venue;
