//! Process supervision for redis-server instances used by test suites.
//!
//! [`port::allocate`] hands out ports that no other worker sharing the claim
//! directory can get, [`RedisExecutor`] owns one server process from launch
//! to teardown, and [`redis_proc`] strings the two together.

pub mod command;
pub mod executor;
pub mod factory;
pub mod port;
pub mod server;
pub mod session;

pub use executor::{Readiness, RedisExecutor, ShutdownOutcome, READY_MARKER};
pub use factory::redis_proc;
pub use server::{NoopRedis, RedisServer};
pub use session::{ClaimSession, SESSION_DIR_ENV};
