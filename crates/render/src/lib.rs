//! Invoice document rendering.
//!
//! Turns a canonical [`orderdesk_core::types::Invoice`] into a paginated A4
//! PDF drawn with explicit coordinates and a running vertical cursor.

pub mod money;
pub mod renderer;

pub use renderer::{invoice_filename, InvoiceRenderer, MerchantInfo, RenderError, RenderedInvoice};
