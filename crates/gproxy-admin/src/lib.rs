//! Ambient admin HTTP surface (§6): health, config inspection/replacement,
//! provider cooldown reset, and request-log inspection/streaming. Grounded on
//! the teacher's `gproxy-admin::router` for the route layout and the
//! `admin_auth` middleware shape (header-based shared secret, layered over
//! the whole sub-router).

mod router;

pub use router::{router, AdminState};
