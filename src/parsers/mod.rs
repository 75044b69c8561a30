//! HTML to domain entity mapping.
//!
//! Each tribunal layout can plug its own [`ProcessoParser`]; the shared
//! engine ships the layout-agnostic [`LabelParser`] and the
//! [`PageClassifier`] that runs before any parser.

mod advogados;
mod classifier;
mod label;

pub use advogados::extrair_advogados;
pub use classifier::{PageClassifier, PageKind};
pub use label::LabelParser;

use crate::domain::ProcessoJudicial;
use crate::error::ScraperResult;
use crate::tribunais::Tribunal;

/// Turns a process page into a [`ProcessoJudicial`].
///
/// Implementations extract what they can and never fail on a sealed case;
/// a page they cannot recognise at all is a [`crate::ScraperError::Parse`].
pub trait ProcessoParser: Send + Sync {
    fn parse(&self, html: &str, numero: &str, tribunal: &Tribunal)
    -> ScraperResult<ProcessoJudicial>;
}
