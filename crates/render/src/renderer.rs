use std::io::BufWriter;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
    Point,
};
use thiserror::Error;

use orderdesk_core::types::Invoice;

use crate::money::{fit_text, format_money, format_negative_money, text_width_mm, wrap_text};

// Page geometry in mm (A4 portrait).
const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN_X: f32 = 15.0;
const RIGHT_EDGE: f32 = PAGE_W - MARGIN_X;
const TOP_Y: f32 = 282.0;
const BOTTOM_Y: f32 = 25.0;
const ROW_H: f32 = 6.0;
const LINE_H: f32 = 5.0;

// Line-item table columns: description left, quantity centered, unit price
// and amount right-aligned.
const COL_DESC_X: f32 = MARGIN_X;
const COL_DESC_W: f32 = 95.0;
const COL_QTY_CENTER: f32 = 127.0;
const COL_UNIT_RIGHT: f32 = 165.0;
const COL_AMOUNT_RIGHT: f32 = RIGHT_EDGE;

const LAYER_NAME: &str = "Layer 1";

/// Errors raised while producing the invoice document.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to build pdf document: {0}")]
    Pdf(String),
}

/// Completed render result. `filename` follows the contract
/// `invoice_<orderId>.pdf` so existing lookups by order id keep resolving.
#[derive(Debug, Clone)]
pub struct RenderedInvoice {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub pages: usize,
}

/// Merchant identity printed in the invoice header and footer.
#[derive(Debug, Clone)]
pub struct MerchantInfo {
    pub name: String,
    pub address_lines: Vec<String>,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub currency_prefix: String,
    pub timezone: Tz,
}

impl Default for MerchantInfo {
    fn default() -> Self {
        Self {
            name: "Orderdesk Store".to_string(),
            address_lines: Vec::new(),
            tax_id: None,
            email: None,
            phone: None,
            currency_prefix: "Rs.".to_string(),
            timezone: chrono_tz::Asia::Kolkata,
        }
    }
}

/// Derives the deterministic output filename for an order id.
///
/// Path separators and other shell-hostile characters must not leak into the
/// filename, so anything outside a conservative set is replaced.
pub fn invoice_filename(order_id: &str) -> String {
    let sanitized: String = order_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("invoice_{sanitized}.pdf")
}

/// Vector invoice renderer: draws text and rules at explicit coordinates
/// onto fixed-size pages, tracking a running vertical cursor and starting a
/// new page before any row that would overflow the bottom margin.
pub struct InvoiceRenderer {
    merchant: MerchantInfo,
}

impl InvoiceRenderer {
    pub fn new(merchant: MerchantInfo) -> Self {
        Self { merchant }
    }

    /// Renders `invoice` into PDF bytes. Rendering is pure: callers decide
    /// where (and whether) the bytes are persisted.
    pub fn render(&self, invoice: &Invoice) -> Result<RenderedInvoice, RenderError> {
        let (doc, page, layer) = PdfDocument::new(
            format!("Invoice {}", invoice.order_id),
            Mm(PAGE_W),
            Mm(PAGE_H),
            LAYER_NAME,
        );
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|err| RenderError::Pdf(err.to_string()))?;
        let font_bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|err| RenderError::Pdf(err.to_string()))?;
        let layer = doc.get_page(page).get_layer(layer);

        let mut cursor = PageCursor {
            doc,
            layer,
            font,
            font_bold,
            y: TOP_Y,
            pages: 1,
        };

        self.draw_header(&mut cursor, invoice);
        self.draw_bill_to(&mut cursor, invoice);
        self.draw_custom_fields(&mut cursor, invoice);
        self.draw_items_table(&mut cursor, invoice);
        self.draw_totals(&mut cursor, invoice);
        self.draw_note(&mut cursor, invoice);
        self.draw_footer(&cursor);

        let pages = cursor.pages;
        let mut writer = BufWriter::new(Vec::<u8>::new());
        cursor
            .doc
            .save(&mut writer)
            .map_err(|err| RenderError::Pdf(err.to_string()))?;
        let bytes = writer
            .into_inner()
            .map_err(|err| RenderError::Pdf(err.to_string()))?;

        Ok(RenderedInvoice {
            filename: invoice_filename(&invoice.order_id),
            bytes,
            pages,
        })
    }

    fn format_date(&self, date: DateTime<Utc>) -> String {
        date.with_timezone(&self.merchant.timezone)
            .format("%-d %B %Y")
            .to_string()
    }

    fn draw_header(&self, c: &mut PageCursor, invoice: &Invoice) {
        let merchant = &self.merchant;
        c.text_bold(&merchant.name, 16.0, MARGIN_X);
        c.text_right_bold("INVOICE", 20.0, RIGHT_EDGE);
        c.advance(8.0);

        let mut left: Vec<String> = merchant.address_lines.clone();
        if let Some(tax_id) = &merchant.tax_id {
            left.push(format!("Tax ID: {tax_id}"));
        }
        if let Some(email) = &merchant.email {
            left.push(format!("Email: {email}"));
        }
        if let Some(phone) = &merchant.phone {
            left.push(format!("Phone: {phone}"));
        }

        let mut right = vec![
            format!("Order ID: {}", invoice.order_id),
            format!("Date: {}", self.format_date(invoice.order_date)),
        ];
        if let Some(status) = &invoice.payment_status {
            right.push(format!("Status: {status}"));
        }

        for row in 0..left.len().max(right.len()) {
            if let Some(line) = left.get(row) {
                c.text(line, 9.0, MARGIN_X);
            }
            if let Some(line) = right.get(row) {
                c.text_right(line, 10.0, RIGHT_EDGE);
            }
            c.advance(4.5);
        }

        c.advance(2.0);
        c.rule();
        c.advance(8.0);
    }

    fn draw_bill_to(&self, c: &mut PageCursor, invoice: &Invoice) {
        c.text_bold("Bill To:", 12.0, MARGIN_X);
        c.advance(6.0);
        c.text(&invoice.customer.name, 10.0, MARGIN_X);
        c.advance(LINE_H);

        if let Some(address) = &invoice.customer.address {
            for line in wrap_text(address, 10.0, 110.0) {
                c.ensure_room(LINE_H);
                c.text(&line, 10.0, MARGIN_X);
                c.advance(LINE_H);
            }
        }
        if let Some(phone) = &invoice.customer.phone {
            c.text(&format!("Phone: {phone}"), 10.0, MARGIN_X);
            c.advance(LINE_H);
        }
        if let Some(email) = &invoice.customer.email {
            c.text(&format!("Email: {email}"), 10.0, MARGIN_X);
            c.advance(LINE_H);
        }
        c.advance(4.0);
    }

    fn draw_custom_fields(&self, c: &mut PageCursor, invoice: &Invoice) {
        if invoice.custom_fields.is_empty() {
            return;
        }
        c.ensure_room(6.0 + LINE_H);
        c.text_bold("Additional Information:", 11.0, MARGIN_X);
        c.advance(6.0);
        for (key, value) in &invoice.custom_fields {
            c.ensure_room(LINE_H);
            let line = fit_text(&format!("{key}: {value}"), 10.0, RIGHT_EDGE - MARGIN_X);
            c.text(&line, 10.0, MARGIN_X);
            c.advance(LINE_H);
        }
        c.advance(4.0);
    }

    fn table_header(&self, c: &mut PageCursor) {
        c.text_bold("Item Description", 10.0, COL_DESC_X);
        c.text_center_bold("Qty", 10.0, COL_QTY_CENTER);
        c.text_right_bold("Price", 10.0, COL_UNIT_RIGHT);
        c.text_right_bold("Amount", 10.0, COL_AMOUNT_RIGHT);
        c.advance(3.5);
        c.rule();
        c.advance(6.5);
    }

    fn draw_items_table(&self, c: &mut PageCursor, invoice: &Invoice) {
        if invoice.line_items.is_empty() {
            c.text("Product details not available in this payload.", 10.0, MARGIN_X);
            c.advance(8.0);
            return;
        }

        let prefix = &self.merchant.currency_prefix;
        // Header plus at least one row must fit before the table starts.
        c.ensure_room(10.0 + ROW_H);
        self.table_header(c);
        for item in &invoice.line_items {
            // Never split a row: break before the item that would overflow.
            if c.ensure_room(ROW_H) {
                self.table_header(c);
            }
            c.text(&fit_text(&item.title, 10.0, COL_DESC_W), 10.0, COL_DESC_X);
            c.text_center(&item.quantity.to_string(), 10.0, COL_QTY_CENTER);
            c.text_right(&format_money(prefix, item.unit_price), 10.0, COL_UNIT_RIGHT);
            c.text_right(&format_money(prefix, item.amount()), 10.0, COL_AMOUNT_RIGHT);
            c.advance(ROW_H);
        }
        c.advance(1.0);
        c.rule();
        c.advance(8.0);
    }

    fn draw_totals(&self, c: &mut PageCursor, invoice: &Invoice) {
        let prefix = &self.merchant.currency_prefix;
        let mut rows: Vec<(&str, String, bool)> =
            vec![("Item Total:", format_money(prefix, invoice.subtotal), false)];
        if invoice.discount > 0.0 {
            rows.push((
                "Discount:",
                format_negative_money(prefix, invoice.discount),
                false,
            ));
        }
        rows.push((
            "Delivery Charges:",
            format_money(prefix, invoice.delivery_fee()),
            false,
        ));
        rows.push(("Grand Total:", format_money(prefix, invoice.grand_total), true));

        // The totals block is kept together on one page.
        c.ensure_room(rows.len() as f32 * 7.0 + 4.0);
        for (label, value, emphasis) in rows {
            if emphasis {
                c.text_bold(label, 13.0, 130.0);
                c.text_right_bold(&value, 13.0, COL_AMOUNT_RIGHT);
            } else {
                c.text(label, 11.0, 130.0);
                c.text_right(&value, 11.0, COL_AMOUNT_RIGHT);
            }
            c.advance(7.0);
        }
        c.advance(4.0);
    }

    fn draw_note(&self, c: &mut PageCursor, invoice: &Invoice) {
        let Some(note) = &invoice.note else {
            return;
        };
        c.ensure_room(6.0 + LINE_H);
        c.text_bold("Note:", 11.0, MARGIN_X);
        c.advance(6.0);
        for line in wrap_text(note, 10.0, RIGHT_EDGE - MARGIN_X) {
            c.ensure_room(LINE_H);
            c.text(&line, 10.0, MARGIN_X);
            c.advance(LINE_H);
        }
    }

    /// Footer lives below the content area on the final page, so it never
    /// collides with the cursor-driven blocks above.
    fn draw_footer(&self, c: &PageCursor) {
        let center = PAGE_W / 2.0;
        c.text_center_bold_at("Thank you for your order!", 10.0, center, 18.0);

        let contact = match (&self.merchant.email, &self.merchant.phone) {
            (Some(email), Some(phone)) => {
                Some(format!("For any queries, please contact us at {email} or {phone}"))
            }
            (Some(email), None) => Some(format!("For any queries, please contact us at {email}")),
            (None, Some(phone)) => Some(format!("For any queries, please contact us at {phone}")),
            (None, None) => None,
        };
        if let Some(line) = contact {
            c.text_center_at(&line, 8.5, center, 14.0);
        }
        c.text_center_at(
            "This is a computer-generated invoice and does not require a signature.",
            8.0,
            center,
            10.0,
        );
    }
}

/// Tracks the active page/layer and the running vertical cursor.
struct PageCursor {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    font_bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PageCursor {
    fn advance(&mut self, dy: f32) {
        self.y -= dy;
    }

    /// Starts a new page when fewer than `needed` mm remain above the bottom
    /// margin. Returns `true` when a page break happened.
    fn ensure_room(&mut self, needed: f32) -> bool {
        if self.y - needed < BOTTOM_Y {
            let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), LAYER_NAME);
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP_Y;
            self.pages += 1;
            true
        } else {
            false
        }
    }

    fn text(&self, text: &str, size: f32, x: f32) {
        self.layer.use_text(text, size, Mm(x), Mm(self.y), &self.font);
    }

    fn text_bold(&self, text: &str, size: f32, x: f32) {
        self.layer
            .use_text(text, size, Mm(x), Mm(self.y), &self.font_bold);
    }

    fn text_right(&self, text: &str, size: f32, right_x: f32) {
        let x = right_x - text_width_mm(text, size);
        self.layer.use_text(text, size, Mm(x), Mm(self.y), &self.font);
    }

    fn text_right_bold(&self, text: &str, size: f32, right_x: f32) {
        let x = right_x - text_width_mm(text, size);
        self.layer
            .use_text(text, size, Mm(x), Mm(self.y), &self.font_bold);
    }

    fn text_center(&self, text: &str, size: f32, center_x: f32) {
        let x = center_x - text_width_mm(text, size) / 2.0;
        self.layer.use_text(text, size, Mm(x), Mm(self.y), &self.font);
    }

    fn text_center_bold(&self, text: &str, size: f32, center_x: f32) {
        let x = center_x - text_width_mm(text, size) / 2.0;
        self.layer
            .use_text(text, size, Mm(x), Mm(self.y), &self.font_bold);
    }

    fn text_center_at(&self, text: &str, size: f32, center_x: f32, y: f32) {
        let x = center_x - text_width_mm(text, size) / 2.0;
        self.layer.use_text(text, size, Mm(x), Mm(y), &self.font);
    }

    fn text_center_bold_at(&self, text: &str, size: f32, center_x: f32, y: f32) {
        let x = center_x - text_width_mm(text, size) / 2.0;
        self.layer
            .use_text(text, size, Mm(x), Mm(y), &self.font_bold);
    }

    fn rule(&self) {
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(MARGIN_X), Mm(self.y)), false),
                (Point::new(Mm(RIGHT_EDGE), Mm(self.y)), false),
            ],
            is_closed: false,
        });
    }
}
