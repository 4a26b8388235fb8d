pub mod alerts;
pub mod config;
pub mod detect;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod ingest;
pub mod model;
pub mod monitor;
pub mod output;
pub mod parser;
pub mod report;
pub mod schedule;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
