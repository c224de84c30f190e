//! Preparation of recorded tax calculation requests and extraction of the fields we compare
//! from calculation responses.
//!
//! Both directions work on an in-memory element tree: requests are decompressed, parsed,
//! mutated and written back out; responses are only parsed and queried.
use std::collections::BTreeSet;
use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use thiserror::Error;
use xmltree::{Element, EmitterConfig, XMLNode};

/// Element counted to report the number of invoice lines in a request.
pub const LINE_TAG: &str = "LINE";
/// Element that makes the calculation service persist a request to its audit log.
pub const AUDIT_FLAG_TAG: &str = "IS_AUDITED";
/// Value written to the audit flag so replayed requests are not audited.
pub const AUDIT_DISABLED: &str = "N";
/// Element carrying a jurisdiction code in calculation responses.
pub const TAXABLE_STATE_TAG: &str = "TAXABLE_STATE";
/// Element carrying the document level tax total in calculation responses.
pub const TOTAL_TAX_TAG: &str = "TOTAL_TAX_AMOUNT";

/// Enumeration of errors for documents that cannot be read or written.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to decompress document: {0}")]
    DecompressError(std::io::Error),
    #[error("failed to parse document: {0}")]
    ParseError(#[from] xmltree::ParseError),
    #[error("failed to serialize document: {0}")]
    SerializeError(#[from] xmltree::Error),
}

/// A request ready to be sent to both calculation endpoints.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// The serialized document, with auditing disabled.
    pub body: Bytes,
    /// Number of line items in the document as recorded.
    pub line_count: usize,
}

/// The fields we read from a calculation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFields {
    /// Distinct jurisdiction codes, sorted and joined with ", ".
    pub jurisdictions: String,
    /// The document tax total. `None` when the response carries no total at all.
    pub total_tax: Option<String>,
}

/// Decompress a recorded request and prepare it for replay.
///
/// The line count is taken before the audit flag is touched. A document without an audit flag
/// is sent as is.
pub fn prepare_request(compressed: &[u8]) -> Result<PreparedRequest, DocumentError> {
    let document = decompress(compressed)?;
    let mut root = Element::parse(trim_whitespace(&document))?;

    let line_count = count_descendants(&root, LINE_TAG);

    if let Some(audit_flag) = find_descendant_mut(&mut root, AUDIT_FLAG_TAG) {
        set_text(audit_flag, AUDIT_DISABLED);
    }

    let mut body = Vec::with_capacity(document.len());
    root.write_with_config(
        &mut body,
        EmitterConfig::new().write_document_declaration(false),
    )?;

    Ok(PreparedRequest {
        body: Bytes::from(body),
        line_count,
    })
}

/// Parse a calculation response and read the jurisdictions and tax total from it.
pub fn extract_response(body: &[u8]) -> Result<ResponseFields, DocumentError> {
    let root = Element::parse(trim_whitespace(body))?;

    let mut states = BTreeSet::new();
    collect_texts(&root, TAXABLE_STATE_TAG, &mut states);

    // An empty total element is still a total, only a missing one is None.
    let total_tax = find_descendant(&root, TOTAL_TAX_TAG)
        .map(|total| total.get_text().map(|text| text.into_owned()).unwrap_or_default());

    Ok(ResponseFields {
        jurisdictions: states.into_iter().collect::<Vec<_>>().join(", "),
        total_tax,
    })
}

fn decompress(compressed: &[u8]) -> Result<Vec<u8>, DocumentError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut document = Vec::new();
    decoder
        .read_to_end(&mut document)
        .map_err(DocumentError::DecompressError)?;

    Ok(document)
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |position| position + 1);

    &bytes[start..end]
}

/// Whether `element` is named `name` and sits in no namespace. Namespaced elements such as
/// `<X:LINE xmlns:X="...">` never match.
fn is_named(element: &Element, name: &str) -> bool {
    element.namespace.as_deref().map_or(true, str::is_empty) && element.name == name
}

/// Count elements named `name` below `element`, not counting `element` itself.
fn count_descendants(element: &Element, name: &str) -> usize {
    element
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .map(|child| usize::from(is_named(child, name)) + count_descendants(child, name))
        .sum()
}

/// First element named `name` below `element` in document order.
fn find_descendant<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    for child in element.children.iter().filter_map(XMLNode::as_element) {
        if is_named(child, name) {
            return Some(child);
        }
        if let Some(found) = find_descendant(child, name) {
            return Some(found);
        }
    }

    None
}

fn find_descendant_mut<'a>(element: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    for node in element.children.iter_mut() {
        if let XMLNode::Element(child) = node {
            if is_named(child, name) {
                return Some(child);
            }
            if let Some(found) = find_descendant_mut(child, name) {
                return Some(found);
            }
        }
    }

    None
}

fn collect_texts(element: &Element, name: &str, values: &mut BTreeSet<String>) {
    for child in element.children.iter().filter_map(XMLNode::as_element) {
        if is_named(child, name) {
            if let Some(text) = child.get_text() {
                values.insert(text.into_owned());
            }
        }
        collect_texts(child, name, values);
    }
}

/// Replace the text that precedes the first child element, leaving child elements in place.
fn set_text(element: &mut Element, text: &str) {
    let leading = element
        .children
        .iter()
        .take_while(|node| matches!(node, XMLNode::Text(_) | XMLNode::CData(_)))
        .count();
    let rest = element.children.split_off(leading);

    element.children = std::iter::once(XMLNode::Text(text.to_owned()))
        .chain(rest)
        .collect();
}
