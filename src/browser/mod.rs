//! Embedded browser used to clear anti-automation challenges
//!
//! The browser is a singleton resource: one Chrome instance with one tab,
//! exposed to the challenge bridge through [`ChallengeSurface`].
//!
//! # Example
//!
//! ```no_run
//! use rust_manga_reader::browser::{BrowserConfig, ChallengeSurface, ChromeSurface};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut surface = ChromeSurface::new(BrowserConfig::stealth_mode());
//! surface.load("https://example.com")?;
//! println!("title: {}", surface.read_signal()?);
//! println!("{} cookies", surface.harvest_cookies()?.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod surface;

// Re-export main types for convenience
pub use config::BrowserConfig;
pub use manager::{BrowserError, BrowserManager};
pub use surface::{ChallengeSurface, ChromeSurface};
