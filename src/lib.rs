pub mod adapter;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geo_math;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod poller;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod token;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
