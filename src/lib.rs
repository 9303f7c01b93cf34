#![warn(missing_docs)]
//! Transparent enhancement of NanoGPT image generation requests.
//!
//! This crate augments outgoing image generation calls with extra parameters
//! (LoRA style-adapter URLs) and user-supplied reference images, without
//! touching the host's own request-building code. Two pipelines compose
//! around one persisted settings document:
//!
//! - **Ingestion**: a selected file becomes a data URL guaranteed to fit
//!   under a 4 MiB ceiling, via a bounded greedy downscale loop.
//! - **Interception**: a decorator around the ambient network transport
//!   rewrites matching generation payloads at send time and forwards
//!   everything else untouched.
//!
//! # Quick Start
//!
//! ```no_run
//! use nanogpt_enhancer::{
//!     install, ImageIngestor, PanelBindings, ReqwestTransport, RequestDecorator, SettingsSink,
//!     SettingsStore,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct HostSink;
//!
//! impl SettingsSink for HostSink {
//!     fn persist(&self, _settings: &nanogpt_enhancer::EnhancerSettings) {
//!         // hand the document back to the host's settings blob
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> nanogpt_enhancer::Result<()> {
//!     let store = Arc::new(SettingsStore::new(
//!         serde_json::Value::Null,
//!         Arc::new(HostSink),
//!         Duration::from_millis(300),
//!     ));
//!
//!     install(RequestDecorator::new(
//!         Arc::new(ReqwestTransport::new()),
//!         Arc::clone(&store),
//!     ));
//!
//!     let panel = PanelBindings::new(store, ImageIngestor::default());
//!     let view = panel.handle_file_selection("reference.png").await?;
//!     println!("{} reference image(s)", view.rows.len());
//!     Ok(())
//! }
//! ```

mod error;

pub mod ingest;
pub mod intercept;
pub mod panel;
pub mod settings;

pub use error::{EnhancerError, Result};

pub use ingest::{encode_data_url, estimated_bytes, ImageIngestor, ImageIngestorBuilder, MAX_IMAGE_BYTES};
pub use intercept::{
    install, installed, OutboundRequest, ReqwestTransport, RequestDecorator, Transport,
    TransportResponse, GENERATE_ENDPOINT, LORA_MODEL,
};
pub use panel::{
    lora_visibility, wait_for, LoraVisibility, PanelBindings, ReferenceListView, ReferenceRow,
};
pub use settings::{
    EnhancerSettings, LoraSlot, LoraSlots, ReferenceImage, SettingsSink, SettingsStore, MODULE_NAME,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{EnhancerError, Result};
    pub use crate::ingest::{ImageIngestor, MAX_IMAGE_BYTES};
    pub use crate::intercept::{install, RequestDecorator, Transport};
    pub use crate::panel::PanelBindings;
    pub use crate::settings::{EnhancerSettings, LoraSlot, SettingsSink, SettingsStore};
}
