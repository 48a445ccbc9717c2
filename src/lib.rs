pub mod app;
pub mod arcgis;
pub mod boundary;
pub mod config;
pub mod crs;
pub mod domain;
pub mod elevation;
pub mod error;
pub mod features;
pub mod geotiff;
pub mod http;
pub mod hydrography;
pub mod output;
pub mod persist;
pub mod roads;
pub mod source;
pub mod store;
