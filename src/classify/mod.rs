//! Content safety screening, categorisation and risk scoring

pub mod classifier;
pub mod risk;
pub mod safety;

pub use classifier::RuleClassifier;
pub use risk::RiskScorer;
pub use safety::{SafetyFilter, FILTER_VERSION};

use crate::discovery::extract::{
    detect_language, extract_links, extract_meta_description, extract_title, visible_text,
};
use crate::discovery::Page;

/// The parts of a page the classifiers look at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    /// Visible text with markup removed
    pub text: String,
    pub link_count: usize,
}

impl PageContent {
    pub fn from_page(page: &Page) -> Self {
        Self::from_html(&page.url, &page.body)
    }

    pub fn from_html(base: &url::Url, html: &str) -> Self {
        Self {
            title: extract_title(html),
            description: extract_meta_description(html),
            language: detect_language(html),
            text: visible_text(html),
            link_count: extract_links(base, html).len(),
        }
    }

    /// Title, description and text joined, for whole-page screening
    pub fn full_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        parts.extend(self.title.as_deref());
        parts.extend(self.description.as_deref());
        parts.push(&self.text);
        parts.join("\n")
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
