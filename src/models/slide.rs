//! Structural decomposition of a file: slides and their text items.
//!
//! Produced once from the document parser's output and never mutated;
//! translations live in their own records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Layout box of a text item on its slide
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Parser output for one text item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedText {
    pub text: String,
    #[serde(default)]
    pub position: TextPosition,
}

/// Parser output for one slide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSlide {
    pub index: i32,
    pub image_path: String,
    #[serde(default)]
    pub texts: Vec<ParsedText>,
}

/// Everything the document parser extracted from one source file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub slides: Vec<ParsedSlide>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideRecord {
    pub id: Uuid,
    pub file_id: Uuid,
    pub slide_index: i32,
    pub image_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRecord {
    pub id: Uuid,
    pub slide_id: Uuid,
    pub file_id: Uuid,
    /// Order of the text within its slide
    pub text_index: i32,
    pub content: String,
    pub position: TextPosition,
}

/// All slides and texts of one file, inserted and loaded as a unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileStructure {
    pub slides: Vec<SlideRecord>,
    pub texts: Vec<TextRecord>,
}

impl FileStructure {
    /// Assign record ids to a parsed document. Slides keep parser order.
    pub fn from_parsed(file_id: Uuid, document: &ParsedDocument) -> Self {
        let mut structure = Self::default();
        for slide in &document.slides {
            let slide_id = Uuid::new_v4();
            structure.slides.push(SlideRecord {
                id: slide_id,
                file_id,
                slide_index: slide.index,
                image_path: slide.image_path.clone(),
            });
            for (text_index, text) in slide.texts.iter().enumerate() {
                structure.texts.push(TextRecord {
                    id: Uuid::new_v4(),
                    slide_id,
                    file_id,
                    text_index: text_index as i32,
                    content: text.text.clone(),
                    position: text.position,
                });
            }
        }
        structure
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Texts of each slide in slide order, each list in text order
    pub fn texts_by_slide(&self) -> Vec<(&SlideRecord, Vec<&TextRecord>)> {
        let mut slides: Vec<&SlideRecord> = self.slides.iter().collect();
        slides.sort_by_key(|slide| slide.slide_index);
        slides
            .into_iter()
            .map(|slide| {
                let mut texts: Vec<&TextRecord> = self
                    .texts
                    .iter()
                    .filter(|text| text.slide_id == slide.id)
                    .collect();
                texts.sort_by_key(|text| text.text_index);
                (slide, texts)
            })
            .collect()
    }
}
