/// Errors returned when parsing CoT documents.
#[derive(Debug, thiserror::Error)]
pub enum CotError {
    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("invalid XML attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("document root is not a CoT event")]
    NotAnEvent,
    #[error("truncated XML document")]
    Truncated,
    #[error("invalid flow tag attribute '{0}': {1}")]
    InvalidFlowTag(&'static str, String),
}
