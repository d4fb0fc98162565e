use crate::command::store::{
    database::schema::{Conversation, Document, Message},
    report::ReportError,
};
use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, Mm, PdfDocument};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const PAGE_TOP: f32 = 20.0;
const PAGE_BOTTOM: f32 = 270.0;
const WRAP_WIDTH: f32 = 170.0;

const MARGIN: f32 = 20.0;
const INDENT: f32 = 25.0;

const POINT_TO_MM: f32 = 0.3528;
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

/// A single line of text placed on a page. `y` grows downwards from the top
/// edge, in millimetres.
#[derive(Clone, Debug, PartialEq)]
pub struct PdfLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// A top-down A4 cursor that collects lines into pages.
#[derive(Clone, Debug)]
pub struct PdfLayout {
    pages: Vec<Vec<PdfLine>>,
    size: f32,
    y: f32,
}

impl Default for PdfLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfLayout {
    pub fn new() -> Self {
        Self {
            pages: vec![vec![]],
            size: 12.0,
            y: PAGE_TOP,
        }
    }

    #[cfg(test)]
    pub fn pages(&self) -> &[Vec<PdfLine>] {
        &self.pages
    }

    #[cfg(test)]
    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn set_font_size(&mut self, size: f32) {
        self.size = size;
    }

    pub fn advance(&mut self, height: f32) {
        self.y += height;
    }

    pub fn add_page(&mut self) {
        self.pages.push(vec![]);
        self.y = PAGE_TOP;
    }

    /// Start a new page once the cursor has moved past `limit`.
    pub fn break_past(&mut self, limit: f32) {
        if self.y > limit {
            self.add_page();
        }
    }

    pub fn text(&mut self, text: impl Into<String>, x: f32) {
        let line = PdfLine {
            text: text.into(),
            x,
            y: self.y,
            size: self.size,
        };

        if let Some(page) = self.pages.last_mut() {
            page.push(line);
        }
    }

    /// Write `text` word-wrapped to the page width, one line per `step`,
    /// breaking pages as needed.
    pub fn paragraph(&mut self, text: &str, x: f32, step: f32) {
        let mut line = String::new();

        for word in text.split(' ') {
            let candidate = format!("{}{} ", line, word);

            if text_width(&candidate, self.size) > WRAP_WIDTH && !line.is_empty() {
                self.text(line.trim(), x);
                self.advance(step);

                line = format!("{} ", word);

                self.break_past(PAGE_BOTTOM);
            } else {
                line = candidate;
            }
        }

        if !line.trim().is_empty() {
            self.text(line.trim(), x);
            self.advance(step);
        }
    }

    pub fn render(&self, title: &str) -> Result<Vec<u8>, ReportError> {
        let (doc, first_page, first_layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");

        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|err| ReportError::Pdf(format!("failed to load font: {:?}", err)))?;

        for (index, lines) in self.pages.iter().enumerate() {
            let (page, layer) = if index == 0 {
                (first_page, first_layer)
            } else {
                doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1")
            };

            let layer = doc.get_page(page).get_layer(layer);

            for line in lines {
                layer.use_text(
                    line.text.clone(),
                    line.size,
                    Mm(line.x),
                    Mm(PAGE_HEIGHT - line.y),
                    &font,
                );
            }
        }

        doc.save_to_bytes()
            .map_err(|err| ReportError::Pdf(format!("failed to save document: {:?}", err)))
    }
}

/// Approximate Helvetica width of `text` at `size` points, in millimetres.
fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * POINT_TO_MM * AVERAGE_GLYPH_WIDTH
}

fn format_date(value: &DateTime<Utc>) -> String {
    value.format("%d/%m/%Y").to_string()
}

fn header(layout: &mut PdfLayout, title: &str, generated_at: &DateTime<Utc>) {
    layout.set_font_size(16.0);
    layout.text(title, MARGIN);
    layout.advance(20.0);

    layout.set_font_size(12.0);
    layout.text(format!("Generated on: {}", format_date(generated_at)), MARGIN);
    layout.advance(20.0);
}

/// Conversations with their messages, oldest message first.
pub fn conversations_pdf(
    conversations: &[(Conversation, Vec<Message>)],
    generated_at: DateTime<Utc>,
) -> PdfLayout {
    let mut layout = PdfLayout::new();

    header(&mut layout, "Conversations Report - Ikated", &generated_at);

    for (conversation, messages) in conversations {
        layout.set_font_size(14.0);
        layout.text(
            format!(
                "Conversation: {}",
                conversation.title.as_deref().unwrap_or("Untitled")
            ),
            MARGIN,
        );
        layout.advance(10.0);

        layout.set_font_size(10.0);
        layout.text(format!("ID: {}", conversation.id), MARGIN);
        layout.advance(10.0);

        layout.text(
            format!("Created on: {}", format_date(&conversation.created_at)),
            MARGIN,
        );
        layout.advance(15.0);

        for message in messages {
            layout.break_past(PAGE_BOTTOM);

            let speaker = if message.role == "user" {
                "User"
            } else {
                "Assistant"
            };

            layout.set_font_size(12.0);
            layout.text(format!("{}:", speaker), MARGIN);
            layout.advance(10.0);

            layout.paragraph(&message.content, INDENT, 7.0);
            layout.advance(10.0);
        }

        layout.advance(10.0);
    }

    layout
}

pub fn documents_pdf(documents: &[Document], generated_at: DateTime<Utc>) -> PdfLayout {
    let mut layout = PdfLayout::new();

    header(&mut layout, "Documents Report - Ikated", &generated_at);

    for document in documents {
        layout.break_past(250.0);

        layout.set_font_size(14.0);
        layout.text(format!("Document: {}", document.original_name), MARGIN);
        layout.advance(10.0);

        layout.set_font_size(10.0);
        layout.text(format!("ID: {}", document.id), MARGIN);
        layout.advance(7.0);

        layout.text(
            format!("Type: {}", document.mime_type.as_deref().unwrap_or("N/A")),
            MARGIN,
        );
        layout.advance(7.0);

        let size = document
            .size
            .map(|size| format!("{} bytes", size))
            .unwrap_or_else(|| "N/A".to_string());

        layout.text(format!("Size: {}", size), MARGIN);
        layout.advance(7.0);

        layout.text(
            format!("Uploaded: {}", format_date(&document.created_at)),
            MARGIN,
        );
        layout.advance(10.0);

        if let Some(data) = document.personal_data() {
            layout.text("Extracted Data:", MARGIN);
            layout.advance(7.0);

            for (key, value) in data.entries() {
                layout.text(format!("  {}: {}", key, value), INDENT);
                layout.advance(7.0);

                layout.break_past(PAGE_BOTTOM);
            }
        }

        layout.advance(10.0);
    }

    layout
}
