//! The fleet agent: the outbound mTLS session to the controller, the
//! local file cache populated by `accept_files`, the default facts
//! collector, and the reconnect loop that ties them together.

pub mod cache;
pub mod client;
pub mod facts;
pub mod reconnect;
pub mod tls;
