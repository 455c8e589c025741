pub mod access;
pub mod comments;
pub mod counters;
pub mod feed;
pub mod post_deletion;
pub mod reactions;
pub mod solution;
