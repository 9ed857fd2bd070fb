//! HTTP handlers. Thin: parse, rate-limit, delegate to the service, map to
//! the status-code contract (200 read, 201 create, 204 mutate).

pub mod announcements;
pub mod courses;
pub mod entries;
pub mod messages;
pub mod oauth;
pub mod queues;
pub mod roster;
pub mod users;
