//! Apigee mobile SDK network instrumentation for Rust.
//!
//! The crate measures every network call an application makes without the application
//! changing how it issues them:
//!
//! * [`net`] defines the three calling conventions (synchronous, asynchronous with a
//!   completion handler, delegate-driven connections) and a reqwest-backed transport;
//! * [`monitoring`] wraps any transport so each call yields exactly one
//!   [`TimingRecord`](monitoring::TimingRecord), and installs that wrapper process-wide;
//! * [`app`] is the client façade that reads configuration and turns interception on.
//!
//! ```no_run
//! use std::sync::Arc;
//! use apigee_rs_sdk::monitoring::{self, CollectingMetricsSink};
//! use apigee_rs_sdk::net::NetworkRequest;
//!
//! let sink = Arc::new(CollectingMetricsSink::new());
//! monitoring::install(sink.clone());
//!
//! let request = NetworkRequest::get("https://api.usergrid.com/status").unwrap();
//! let completion = monitoring::send_synchronous_request(&request);
//! println!("{:?} in {:?}", completion.response.map(|r| r.status), sink.records()[0].duration());
//! ```

pub mod app;
pub mod monitoring;
pub mod net;
pub mod platform;

#[cfg(test)]
pub mod test_support;
