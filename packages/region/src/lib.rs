#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region routing and the static service registry.
//!
//! [`router`] maps a WGS84 point to a region label through an ordered
//! bounding-box table; [`registry`] maps a region label to its configured
//! geodata service endpoints. Both are purely data-driven — TOML files
//! embedded at compile time, no network access at load.

pub mod registry;
pub mod router;

pub use registry::{
    AxisOrder, OutputFormat, ProtocolFamily, RegionServices, ServiceEndpointConfig, all_regions,
    services_for, services_for_category,
};
pub use router::{DetectionMethod, RegionDescriptor, classify, region_by_label};
