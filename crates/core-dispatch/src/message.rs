//! Message-name splitting.
//!
//! A message name is a mixed sequence of keyword tokens, argument blanks
//! (`_`), and section markers (`§`). The blank count fixes the method's
//! arity; the section markers are the attachment points for a macro's
//! prefix functions, which the parser invokes as it crosses each marker.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("message name is empty")]
    Empty,
    #[error("message name has adjacent argument blanks")]
    AdjacentBlanks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Keyword(String),
    Blank,
    SectionMarker,
}

#[derive(Debug, Clone)]
pub struct MessageSplitter {
    name: String,
    parts: Vec<MessagePart>,
    num_blanks: usize,
    num_markers: usize,
}

impl MessageSplitter {
    pub fn split(name: &str) -> Result<MessageSplitter, MessageError> {
        if name.is_empty() {
            return Err(MessageError::Empty);
        }
        let mut parts = Vec::new();
        let mut keyword = String::new();
        let mut previous_blank = false;
        for ch in name.chars() {
            match ch {
                '_' => {
                    if previous_blank {
                        return Err(MessageError::AdjacentBlanks);
                    }
                    if !keyword.is_empty() {
                        parts.push(MessagePart::Keyword(std::mem::take(&mut keyword)));
                    }
                    parts.push(MessagePart::Blank);
                    previous_blank = true;
                }
                '§' => {
                    if !keyword.is_empty() {
                        parts.push(MessagePart::Keyword(std::mem::take(&mut keyword)));
                    }
                    parts.push(MessagePart::SectionMarker);
                    previous_blank = false;
                }
                other if other.is_whitespace() => {
                    if !keyword.is_empty() {
                        parts.push(MessagePart::Keyword(std::mem::take(&mut keyword)));
                    }
                    previous_blank = false;
                }
                other => {
                    keyword.push(other);
                    previous_blank = false;
                }
            }
        }
        if !keyword.is_empty() {
            parts.push(MessagePart::Keyword(keyword));
        }
        let num_blanks = parts.iter().filter(|p| **p == MessagePart::Blank).count();
        let num_markers = parts
            .iter()
            .filter(|p| **p == MessagePart::SectionMarker)
            .count();
        Ok(MessageSplitter {
            name: name.to_owned(),
            parts,
            num_blanks,
            num_markers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    /// The method arity: one argument per blank.
    pub fn arity(&self) -> usize {
        self.num_blanks
    }

    /// The number of prefix functions a macro on this message must supply.
    pub fn section_markers(&self) -> usize {
        self.num_markers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn arity_counts_blanks() {
        let splitter = MessageSplitter::split("_+_").unwrap();
        assert_eq!(splitter.arity(), 2);
        assert_eq!(splitter.section_markers(), 0);
        assert_eq!(
            splitter.parts(),
            &[
                MessagePart::Blank,
                MessagePart::Keyword("+".to_owned()),
                MessagePart::Blank
            ]
        );
    }

    #[test]
    fn section_markers_are_counted_separately() {
        let splitter = MessageSplitter::split("let _ := _ § in _").unwrap();
        assert_eq!(splitter.arity(), 3);
        assert_eq!(splitter.section_markers(), 1);
    }

    #[test]
    fn degenerate_names_are_rejected() {
        assert!(matches!(MessageSplitter::split(""), Err(MessageError::Empty)));
        assert!(matches!(
            MessageSplitter::split("__"),
            Err(MessageError::AdjacentBlanks)
        ));
    }
}
