//! Autoload map generation for PHP package trees.
//!
//! Given a root package and its resolved dependencies, [`autoload`] merges
//! their PSR-0, PSR-4, classmap and files declarations and [`classmap`] scans
//! source trees for class, interface, trait and enum declarations.

pub mod autoload;
pub mod classmap;
pub mod error;
pub mod package;

pub use autoload::{AutoloadGenerator, AutoloadReport, GeneratorConfig};
pub use classmap::ClassMap;
pub use error::{Error, ErrorKind, Result};
pub use package::{AutoloadRules, Package, PathList};
