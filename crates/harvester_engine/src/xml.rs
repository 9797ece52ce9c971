use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::scope::ScopeError;
use crate::token::{QName, StartTag, Token, TokenSource};

/// Token source over a namespace-aware streaming XML reader.
pub struct XmlTokenSource<R> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    pending_end: Option<QName>,
}

impl<R: BufRead> XmlTokenSource<R> {
    pub fn new(input: R) -> Self {
        let mut reader = NsReader::from_reader(input);
        let config = reader.config_mut();
        config.trim_text(true);
        // closing tags are matched by the scope processor, which treats a mismatch as fatal
        config.check_end_names = false;
        Self {
            reader,
            buf: Vec::new(),
            pending_end: None,
        }
    }
}

impl<'a> XmlTokenSource<&'a [u8]> {
    pub fn from_text(text: &'a str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl<R: BufRead> TokenSource for XmlTokenSource<R> {
    fn next_token(&mut self) -> Result<Option<Token>, ScopeError> {
        if let Some(name) = self.pending_end.take() {
            return Ok(Some(Token::End(name)));
        }

        loop {
            self.buf.clear();
            let (resolved, event) = self
                .reader
                .read_resolved_event_into(&mut self.buf)
                .map_err(map_xml_error)?;
            let namespace = namespace_of(&resolved)?;

            match event {
                Event::Start(start) => {
                    return Ok(Some(Token::Start(start_tag(namespace, &start)?)));
                }
                Event::Empty(start) => {
                    let tag = start_tag(namespace, &start)?;
                    self.pending_end = Some(tag.name.clone());
                    return Ok(Some(Token::Start(tag)));
                }
                Event::End(end) => {
                    let local = utf8(end.local_name().as_ref())?;
                    return Ok(Some(Token::End(QName {
                        namespace,
                        local,
                    })));
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(map_xml_error)?;
                    if !text.trim().is_empty() {
                        return Ok(Some(Token::Text(text.into_owned())));
                    }
                }
                Event::CData(data) => {
                    let text = utf8(&data)?;
                    if !text.trim().is_empty() {
                        return Ok(Some(Token::Text(text)));
                    }
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

fn namespace_of(resolved: &ResolveResult<'_>) -> Result<Option<String>, ScopeError> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Ok(Some(utf8(ns)?)),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(ScopeError::Malformed(format!(
            "undeclared namespace prefix `{}`",
            String::from_utf8_lossy(prefix)
        ))),
    }
}

fn start_tag(namespace: Option<String>, start: &BytesStart<'_>) -> Result<StartTag, ScopeError> {
    let local = utf8(start.local_name().as_ref())?;
    let mut tag = StartTag::new(QName { namespace, local });
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| ScopeError::Malformed(err.to_string()))?;
        let key = attribute.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let name = utf8(attribute.key.local_name().as_ref())?;
        let value = attribute.unescape_value().map_err(map_xml_error)?;
        tag.attributes.push((name, value.into_owned()));
    }
    Ok(tag)
}

fn utf8(bytes: &[u8]) -> Result<String, ScopeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|err| ScopeError::Malformed(err.to_string()))
}

fn map_xml_error(err: quick_xml::Error) -> ScopeError {
    match err {
        quick_xml::Error::Io(io) => ScopeError::Io(io.to_string()),
        other => ScopeError::Malformed(other.to_string()),
    }
}
