use crate::error::CotError;
use crate::flow_tag::FlowTag;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use std::ops::Range;

const FLOW_TAGS_ELEMENT: &[u8] = b"_flow-tags_";
const DETAIL_ELEMENT: &[u8] = b"detail";
const EVENT_ELEMENT: &[u8] = b"event";

/// A parsed CoT event document.
///
/// Only the `_flow-tags_` element is interpreted; the rest of the
/// document is kept as raw bytes. [CotMessage::serialize] returns the
/// input unchanged unless the flow tag was modified, in which case the
/// new tag is spliced into the original bytes so that all other content
/// survives byte for byte.
#[derive(Debug, Clone)]
pub struct CotMessage {
    raw: Vec<u8>,
    flow_tag: Option<FlowTag>,
    dirty: bool,

    // Splice targets discovered during parsing.
    tag_span: Option<Range<usize>>,
    detail_close_pos: Option<usize>,
    detail_empty_span: Option<Range<usize>>,
    event_close_pos: Option<usize>,
    event_empty_span: Option<Range<usize>>,
}

impl CotMessage {
    /// Parse a CoT XML document.
    ///
    /// The document must be well formed and its root element must be
    /// `event`. Anything else fails with a [CotError]; callers that
    /// tolerate non-CoT traffic pass the raw bytes through instead.
    pub fn parse(data: &[u8]) -> Result<CotMessage, CotError> {
        let mut reader = Reader::from_reader(data);
        let mut buf = Vec::new();

        let mut msg = CotMessage {
            raw: data.to_vec(),
            flow_tag: None,
            dirty: false,
            tag_span: None,
            detail_close_pos: None,
            detail_empty_span: None,
            event_close_pos: None,
            event_empty_span: None,
        };

        // Stack of open element names below (and including) the root.
        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut root_seen = false;
        let mut tag_start = 0usize;

        loop {
            let start_pos = reader.buffer_position() as usize;
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    if stack.is_empty() {
                        if name != EVENT_ELEMENT {
                            return Err(CotError::NotAnEvent);
                        }
                        root_seen = true;
                    } else if Self::is_flow_tags_position(&stack, &name) && msg.tag_span.is_none()
                    {
                        msg.flow_tag = Some(parse_flow_tag(&e)?);
                        tag_start = start_pos;
                    }
                    stack.push(name);
                }
                Event::End(_) => {
                    // Name matching against the opening tag is enforced
                    // by the reader itself.
                    let name = stack.pop().ok_or(CotError::NotAnEvent)?;
                    let end_pos = reader.buffer_position() as usize;
                    if stack.is_empty() {
                        msg.event_close_pos = Some(start_pos);
                        break;
                    }
                    if stack.len() == 1 && name == DETAIL_ELEMENT {
                        msg.detail_close_pos.get_or_insert(start_pos);
                    } else if stack.len() == 2
                        && name == FLOW_TAGS_ELEMENT
                        && stack[1] == DETAIL_ELEMENT
                        && msg.tag_span.is_none()
                        && msg.flow_tag.is_some()
                    {
                        msg.tag_span = Some(tag_start..end_pos);
                    }
                }
                Event::Empty(e) => {
                    let name = e.name().as_ref().to_vec();
                    let end_pos = reader.buffer_position() as usize;
                    if stack.is_empty() {
                        if name != EVENT_ELEMENT {
                            return Err(CotError::NotAnEvent);
                        }
                        root_seen = true;
                        msg.event_empty_span = Some(start_pos..end_pos);
                        break;
                    }
                    if stack.len() == 1 && name == DETAIL_ELEMENT {
                        msg.detail_empty_span.get_or_insert(start_pos..end_pos);
                    } else if Self::is_flow_tags_position(&stack, &name) && msg.tag_span.is_none()
                    {
                        msg.flow_tag = Some(parse_flow_tag(&e)?);
                        msg.tag_span = Some(start_pos..end_pos);
                    }
                }
                Event::Eof => {
                    if !root_seen {
                        return Err(CotError::NotAnEvent);
                    }
                    return Err(CotError::Truncated);
                }
                // Declaration, text, comments etc. are opaque payload.
                _ => {}
            }
            buf.clear();
        }

        Ok(msg)
    }

    fn is_flow_tags_position(stack: &[Vec<u8>], name: &[u8]) -> bool {
        stack.len() == 2 && stack[1] == DETAIL_ELEMENT && name == FLOW_TAGS_ELEMENT
    }

    /// The raw bytes this message was parsed from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The message's flow tag, if it carries one.
    pub fn flow_tag(&self) -> Option<&FlowTag> {
        self.flow_tag.as_ref()
    }

    /// Mutable access to the flow tag. Marks the tag as modified, so
    /// [CotMessage::serialize] will re-emit it.
    pub fn flow_tag_mut(&mut self) -> Option<&mut FlowTag> {
        if self.flow_tag.is_some() {
            self.dirty = true;
        }
        self.flow_tag.as_mut()
    }

    /// Attach or replace the flow tag.
    pub fn set_flow_tag(&mut self, tag: FlowTag) {
        self.flow_tag = Some(tag);
        self.dirty = true;
    }

    /// Serialize the message back to bytes.
    ///
    /// If the flow tag was never touched this returns the original
    /// input unchanged. Otherwise the re-rendered `_flow-tags_` element
    /// is spliced into the original document, materializing a `detail`
    /// element if the event had none.
    pub fn serialize(&self) -> Vec<u8> {
        if !self.dirty {
            return self.raw.clone();
        }
        let tag_xml = match &self.flow_tag {
            Some(tag) => render_flow_tag(tag),
            None => return self.raw.clone(),
        };

        if let Some(span) = &self.tag_span {
            return splice(&self.raw, span.clone(), tag_xml.as_bytes());
        }
        if let Some(pos) = self.detail_close_pos {
            return splice(&self.raw, pos..pos, tag_xml.as_bytes());
        }
        if let Some(span) = &self.detail_empty_span {
            let wrapped = format!("<detail>{tag_xml}</detail>");
            return splice(&self.raw, span.clone(), wrapped.as_bytes());
        }
        if let Some(pos) = self.event_close_pos {
            let wrapped = format!("<detail>{tag_xml}</detail>");
            return splice(&self.raw, pos..pos, wrapped.as_bytes());
        }
        if let Some(span) = &self.event_empty_span {
            // Expand `<event .../>` into an open/close pair holding the
            // new detail element.
            let head = &self.raw[span.start..span.end - 2];
            let mut out = Vec::with_capacity(self.raw.len() + tag_xml.len() + 32);
            out.extend_from_slice(&self.raw[..span.start]);
            out.extend_from_slice(head);
            out.extend_from_slice(b">");
            out.extend_from_slice(format!("<detail>{tag_xml}</detail>").as_bytes());
            out.extend_from_slice(b"</event>");
            out.extend_from_slice(&self.raw[span.end..]);
            return out;
        }
        self.raw.clone()
    }
}

fn splice(raw: &[u8], span: Range<usize>, replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + replacement.len());
    out.extend_from_slice(&raw[..span.start]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&raw[span.end..]);
    out
}

fn parse_flow_tag(e: &BytesStart) -> Result<FlowTag, CotError> {
    let mut tag = FlowTag {
        origin: String::new(),
        sequence: 0,
        timestamp_ms: 0,
        hops: Vec::new(),
        version: None,
    };
    // `with_checks(false)` tolerates the repeated `h` attributes some
    // encoders emit for the hop list.
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"f" => tag.origin = value.into_owned(),
            b"m" => {
                tag.sequence = value
                    .parse()
                    .map_err(|_| CotError::InvalidFlowTag("m", value.into_owned()))?;
            }
            b"t" => {
                tag.timestamp_ms = value
                    .parse()
                    .map_err(|_| CotError::InvalidFlowTag("t", value.into_owned()))?;
            }
            b"h" => tag
                .hops
                .extend(value.split_whitespace().map(str::to_string)),
            b"version" => tag.version = Some(value.into_owned()),
            _ => {}
        }
    }
    Ok(tag)
}

fn render_flow_tag(tag: &FlowTag) -> String {
    let mut out = String::from("<_flow-tags_");
    if let Some(version) = &tag.version {
        out.push_str(&format!(" version=\"{}\"", escape(version)));
    }
    out.push_str(&format!(
        " f=\"{}\" m=\"{}\" t=\"{}\"",
        escape(&tag.origin),
        tag.sequence,
        tag.timestamp_ms
    ));
    if !tag.hops.is_empty() {
        let hops = tag.hops.join(" ");
        out.push_str(&format!(" h=\"{}\"", escape(&hops)));
    }
    out.push_str("/>");
    out
}
