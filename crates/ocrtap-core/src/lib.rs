//! # ocrtap-core
//!
//! OCR-driven automation of iOS devices through WebDriverAgent (WDA).
//!
//! WDA does the device work (taps, swipes, typing, screenshots); an OCR
//! engine finds text in the screenshots. This crate is the glue: it turns
//! "tap the word *General*" into screenshot → OCR → match → tap.
//!
//! ## Modules
//!
//! - [`wda_client`] - HTTP transport to WDA with typed errors
//! - [`protocol`] - WDA routes and reply decoding
//! - [`driver`] / [`wda_driver`] - Automation trait and its WDA implementation
//!   (session creation and recreation)
//! - [`usb_tunnel`] - usbmuxd device listing and WDA port forwarding
//! - [`ocr`] - OCR engine trait, Tesseract and PaddleOCR engines, text matching
//! - [`screen`] - Screenshot + OCR cache, pixel/point conversion, polling
//! - [`automator`] - The automation façade
//! - [`action`] / [`executor`] - JSON scripts and their runner
//! - [`config`] - `~/.ocrtap/config.json`
//!
//! ## External Dependencies
//!
//! - **WebDriverAgent** running on the device and reachable over HTTP
//!   (forwarded with `iproxy`, or by [`usb_tunnel`])
//! - **tesseract** on `PATH` for the default OCR engine
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocrtap_core::automator::{Automator, AutomatorSettings};
//! use ocrtap_core::ocr::{build_engine, OcrSettings};
//! use ocrtap_core::wda_driver::WdaDriver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Arc::new(WdaDriver::new("http://localhost:8100")?);
//! let engine = build_engine(&OcrSettings::default())?;
//! let auto = Automator::new(driver, engine, AutomatorSettings::default());
//!
//! auto.connect().await?;
//! auto.tap_text("Wi-Fi").await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod automator;
pub mod config;
pub mod driver;
pub mod element;
pub mod executor;
pub mod ocr;
pub mod protocol;
pub mod screen;
pub mod usb_tunnel;
pub mod wda_client;
pub mod wda_driver;

#[cfg(test)]
mod testing;
