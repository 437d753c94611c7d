use std::collections::BTreeMap;

use base64::Engine as _;
use bytes::Bytes;
use md5::{Digest, Md5};
use serde_json::{Map, Value};

use crate::cookie::{Cookie, strip_line_breaks};
use crate::html;
use crate::{RedirectSignal, ResponseError};

const INITIAL_BUFFER_SIZE: usize = 2048;
const NESTED_BUFFER_SIZE: usize = 64;
const DEFAULT_CONTENT_TYPE: &str = "text/html";
const DEFAULT_CHARSET: &str = "UTF-8";

/// Conditional request data the client sent along, used to short-circuit
/// unchanged responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditional {
    pub etags: Vec<String>,
    pub if_modified_since: Option<i64>,
}

impl Conditional {
    pub fn has_etag(&self, etag: &str) -> bool {
        self.etags.iter().any(|candidate| candidate == etag || candidate == "*")
    }
}

/// Accumulates the output of one request and finalizes it into an immutable
/// payload.
///
/// Owned by the worker thread while the request runs; once [`close`] has run
/// the payload is fixed and further writes are ignored until [`reset`].
///
/// [`close`]: ResponseBuffer::close
/// [`reset`]: ResponseBuffer::reset
#[derive(Debug)]
pub struct ResponseBuffer {
    content_type: String,
    charset: Option<String>,
    status: u16,
    cacheable: bool,
    realm: Option<String>,
    payload: Option<Bytes>,
    closed: bool,
    redirect: Option<String>,
    forward: Option<String>,
    last_modified: Option<i64>,
    not_modified: bool,
    etag: Option<String>,
    cookies: BTreeMap<String, Cookie>,
    buffer: Option<String>,
    nested: Vec<Option<String>>,
    recycled: Option<String>,
    debug: Option<String>,
    message: Option<String>,
    error: Option<String>,
    skin: Option<String>,
    data: Map<String, Value>,
    meta: Map<String, Value>,
    conditional: Conditional,
    auto_etags: bool,
    encoding_error: Option<ResponseError>,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new(Conditional::default())
    }
}

impl ResponseBuffer {
    pub fn new(conditional: Conditional) -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            charset: None,
            status: 200,
            cacheable: true,
            realm: None,
            payload: None,
            closed: false,
            redirect: None,
            forward: None,
            last_modified: None,
            not_modified: false,
            etag: None,
            cookies: BTreeMap::new(),
            buffer: None,
            nested: Vec::new(),
            recycled: None,
            debug: None,
            message: None,
            error: None,
            skin: None,
            data: Map::new(),
            meta: Map::new(),
            conditional,
            auto_etags: true,
            encoding_error: None,
        }
    }

    pub fn with_auto_etags(mut self, enabled: bool) -> Self {
        self.auto_etags = enabled;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ========== Writing ==========

    fn target(&mut self, hint: usize) -> &mut String {
        self.buffer
            .get_or_insert_with(|| String::with_capacity((hint + 100).max(INITIAL_BUFFER_SIZE)))
    }

    /// Append text unchanged.
    pub fn write(&mut self, text: &str) {
        if self.closed {
            return;
        }
        self.target(text.len()).push_str(text);
    }

    /// Append text followed by a newline.
    pub fn writeln(&mut self, text: &str) {
        if self.closed {
            return;
        }
        let buf = self.target(text.len());
        buf.push_str(text);
        buf.push('\n');
    }

    /// Append text with all markup escaped.
    pub fn encode(&mut self, text: &str) {
        if self.closed {
            return;
        }
        html::encode_all(text, self.target(text.len()));
    }

    /// Append text with entities escaped but tags passed through.
    pub fn format(&mut self, text: &str) {
        if self.closed {
            return;
        }
        html::encode_markup(text, self.target(text.len()));
    }

    pub fn encode_xml(&mut self, text: &str) {
        if self.closed {
            return;
        }
        html::encode_xml(text, self.target(text.len()));
    }

    pub fn encode_form(&mut self, text: &str) {
        if self.closed {
            return;
        }
        html::encode_form(text, self.target(text.len()));
    }

    /// Queue a debug line, appended to HTML responses on close.
    pub fn debug(&mut self, message: &str) {
        if self.closed {
            return;
        }
        let buf = self
            .debug
            .get_or_insert_with(|| String::from("<div class=\"debug\">"));
        buf.push_str("<div class=\"debug-line\">");
        buf.push_str(message);
        buf.push_str("</div>");
    }

    /// Set the raw payload directly, bypassing charset encoding.
    pub fn write_binary(&mut self, bytes: impl Into<Bytes>) {
        if self.closed {
            return;
        }
        self.payload = Some(bytes.into());
    }

    /// Text written so far to the active buffer.
    pub fn text(&self) -> &str {
        self.buffer.as_deref().unwrap_or("")
    }

    // ========== Nested buffers ==========

    /// Redirect output into a fresh nested buffer until [`pop_string`] is called.
    ///
    /// [`pop_string`]: ResponseBuffer::pop_string
    pub fn push_buffer(&mut self) {
        let fresh = self
            .recycled
            .take()
            .unwrap_or_else(|| String::with_capacity(NESTED_BUFFER_SIZE));
        let outer = self.buffer.replace(fresh);
        self.nested.push(outer);
    }

    /// Return the text captured since the matching [`push_buffer`] and switch
    /// back to the enclosing buffer.
    ///
    /// [`push_buffer`]: ResponseBuffer::push_buffer
    pub fn pop_string(&mut self) -> Result<String, ResponseError> {
        let outer = self.nested.pop().ok_or(ResponseError::UnbalancedBuffer)?;
        let mut inner = std::mem::replace(&mut self.buffer, outer).unwrap_or_default();
        let text = inner.clone();
        inner.clear();
        self.recycled = Some(inner);
        Ok(text)
    }

    pub fn nesting_depth(&self) -> usize {
        self.nested.len()
    }

    /// Drop any nested buffers left over from an aborted render.
    pub fn unwind_nested(&mut self) {
        while let Some(outer) = self.nested.pop() {
            self.buffer = outer;
        }
    }

    // ========== Control flow ==========

    /// Record a redirect target and return the signal that ends the action.
    pub fn redirect(&mut self, url: &str) -> RedirectSignal {
        let target = strip_line_breaks(url);
        self.redirect = Some(target.clone());
        RedirectSignal::to(target)
    }

    /// Record an internal forward target and return the signal that ends the action.
    pub fn forward(&mut self, url: &str) -> RedirectSignal {
        let target = strip_line_breaks(url);
        self.forward = Some(target.clone());
        RedirectSignal::to(target)
    }

    pub fn redirect_target(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    pub fn forward_target(&self) -> Option<&str> {
        self.forward.as_deref()
    }

    /// Set an explicit ETag. Fails with a not-modified signal when the client
    /// already holds it.
    pub fn set_etag(&mut self, value: &str) -> Result<(), RedirectSignal> {
        let etag = format!("\"{}\"", value);
        let matched = self.conditional.has_etag(&etag);
        self.etag = Some(etag);
        if matched {
            self.not_modified = true;
            return Err(RedirectSignal::not_modified());
        }
        Ok(())
    }

    /// Set Last-Modified (milliseconds, rounded down to whole seconds). Fails
    /// with a not-modified signal when it equals the client's `If-Modified-Since`.
    pub fn set_last_modified(&mut self, millis: i64) -> Result<(), RedirectSignal> {
        let rounded = millis.div_euclid(1000) * 1000;
        self.last_modified = Some(rounded);
        if self.conditional.if_modified_since == Some(rounded) {
            self.not_modified = true;
            return Err(RedirectSignal::not_modified());
        }
        Ok(())
    }

    // ========== Metadata ==========

    pub fn set_cookie(
        &mut self,
        name: &str,
        value: Option<&str>,
        days: Option<i32>,
        path: Option<&str>,
        domain: Option<&str>,
    ) {
        let cookie = self
            .cookies
            .entry(name.to_string())
            .or_insert_with(|| Cookie::new(name, None));
        cookie.set_value(value);
        cookie.days = days;
        cookie.path = path.map(str::to_string);
        cookie.domain = domain.map(str::to_string);
    }

    pub fn reset_cookies(&mut self) {
        self.cookies.clear();
    }

    pub fn count_cookies(&self) -> usize {
        self.cookies.len()
    }

    pub fn cookies(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.values()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn mime_type(&self) -> &str {
        &self.content_type
    }

    /// MIME type including the charset parameter when one is known.
    pub fn content_type(&self) -> String {
        match &self.charset {
            Some(charset) => format!("{}; charset={}", self.content_type, charset),
            None => self.content_type.clone(),
        }
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.content_type = content_type.to_string();
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn set_charset(&mut self, charset: &str) {
        self.charset = Some(charset.to_string());
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn set_cacheable(&mut self, cacheable: bool) {
        self.cacheable = cacheable;
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn set_realm(&mut self, realm: &str) {
        self.realm = Some(realm.to_string());
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.last_modified
    }

    pub fn not_modified(&self) -> bool {
        self.not_modified
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: Option<String>) {
        self.message = message;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    /// Skin the action asked to render after it returns.
    pub fn skin(&self) -> Option<&str> {
        self.skin.as_deref()
    }

    pub fn set_skin(&mut self, skin: Option<String>) {
        self.skin = skin;
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.meta
    }

    pub fn conditional(&self) -> &Conditional {
        &self.conditional
    }

    // ========== Lifecycle ==========

    /// Clear the text buffer only.
    pub fn reset_buffer(&mut self) {
        if let Some(buf) = self.buffer.as_mut() {
            buf.clear();
        }
    }

    /// Return to the initial empty state, keeping the client's conditional data.
    pub fn reset(&mut self) {
        if let Some(buf) = self.buffer.as_mut() {
            buf.clear();
        }
        self.nested.clear();
        self.payload = None;
        self.closed = false;
        self.cacheable = true;
        self.redirect = None;
        self.forward = None;
        self.message = None;
        self.error = None;
        self.skin = None;
        self.etag = None;
        self.realm = None;
        self.charset = None;
        self.content_type = DEFAULT_CONTENT_TYPE.to_string();
        self.status = 200;
        self.data.clear();
        self.meta.clear();
        self.last_modified = None;
        self.not_modified = false;
        self.cookies.clear();
        self.encoding_error = None;
    }

    /// Write the standard error page (status 500) unless suppressed.
    pub fn report_error(
        &mut self,
        app_name: &str,
        message: &str,
        trace: Option<&str>,
        debug: bool,
        suppress_page: bool,
    ) {
        self.status = 500;
        if suppress_page {
            return;
        }
        self.write("<html><body><h2>Error in application ");
        self.encode(app_name);
        self.write("</h2><p>");
        self.encode(message);
        self.writeln("</p>");
        if debug {
            if let Some(trace) = trace {
                self.writeln("<h3>Stack trace</h3>");
                self.write("<pre>");
                self.encode_form(trace);
                self.writeln("</pre>");
            }
        }
        self.writeln("</body></html>");
    }

    /// Finalize the response into bytes.
    ///
    /// Runs once; later calls are no-ops. When the charset is unknown the text
    /// is still encoded as UTF-8 and the error is returned (and kept for
    /// [`encoding_error`]).
    ///
    /// [`encoding_error`]: ResponseBuffer::encoding_error
    pub fn close(&mut self, default_charset: Option<&str>) -> Result<(), ResponseError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.unwind_nested();

        if self.payload.is_none() {
            let mut charset = self
                .charset
                .clone()
                .or_else(|| default_charset.map(str::to_string))
                .unwrap_or_else(|| DEFAULT_CHARSET.to_string());

            if self.content_type.starts_with("text/html") {
                if let Some(mut debug) = self.debug.take() {
                    debug.push_str("</div>");
                    self.target(debug.len()).push_str(&debug);
                }
            }

            let text = self.buffer.take().unwrap_or_default();
            let bytes = match encoding_rs::Encoding::for_label(charset.as_bytes()) {
                // encoding_rs has no UTF-16 encoder; its output encoding for these is UTF-8
                Some(encoding) if encoding == encoding_rs::UTF_16LE => {
                    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
                }
                Some(encoding) if encoding == encoding_rs::UTF_16BE => {
                    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
                }
                Some(encoding) => {
                    let (encoded, used, _) = encoding.encode(&text);
                    if used != encoding {
                        charset = used.name().to_string();
                    }
                    encoded.into_owned()
                }
                None => {
                    tracing::warn!("Unsupported response charset {}", charset);
                    self.encoding_error = Some(ResponseError::UnsupportedCharset(charset.clone()));
                    text.into_bytes()
                }
            };
            self.charset = Some(charset);
            self.payload = Some(Bytes::from(bytes));
        }

        if self.auto_etags
            && self.etag.is_none()
            && self.last_modified.is_none()
            && self.status == 200
            && self.redirect.is_none()
        {
            let payload = self.payload.clone().unwrap_or_default();
            let digest = Md5::digest(&payload);
            let etag = format!(
                "\"{}\"",
                base64::engine::general_purpose::STANDARD.encode(digest)
            );
            // cookies must still reach the client, so they rule out the empty 304 body
            if self.conditional.has_etag(&etag) && self.cookies.is_empty() {
                self.payload = Some(Bytes::new());
                self.not_modified = true;
            }
            self.etag = Some(etag);
        }

        match &self.encoding_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// The finalized payload, `None` until closed.
    pub fn content(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn content_length(&self) -> usize {
        self.payload.as_ref().map(Bytes::len).unwrap_or(0)
    }

    /// Payload as text, lossy for non UTF-8 charsets.
    pub fn body_text(&self) -> String {
        self.payload
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    pub fn encoding_error(&self) -> Option<&ResponseError> {
        self.encoding_error.as_ref()
    }

    /// HTTP-style header list for a transport adapter.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), self.content_type())];
        if let Some(target) = &self.redirect {
            headers.push(("Location".to_string(), target.clone()));
        }
        if let Some(etag) = &self.etag {
            headers.push(("ETag".to_string(), etag.clone()));
        }
        if let Some(millis) = self.last_modified {
            if let Some(date) = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis) {
                headers.push((
                    "Last-Modified".to_string(),
                    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                ));
            }
        }
        if !self.cacheable {
            headers.push(("Cache-Control".to_string(), "no-cache".to_string()));
        }
        if let Some(realm) = &self.realm {
            headers.push((
                "WWW-Authenticate".to_string(),
                format!("Basic realm=\"{}\"", realm),
            ));
        }
        for cookie in self.cookies.values() {
            headers.push(("Set-Cookie".to_string(), cookie.header_value()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(mut res: ResponseBuffer) -> ResponseBuffer {
        res.close(None).expect("close");
        res
    }

    #[test]
    fn close_is_idempotent() {
        let mut res = ResponseBuffer::default();
        res.write("hello ");
        res.encode("<world>");
        res.close(None).unwrap();
        let first = res.content().cloned().unwrap();
        let etag = res.etag().map(str::to_string);
        res.close(Some("ISO-8859-1")).unwrap();
        assert_eq!(res.content().cloned().unwrap(), first);
        assert_eq!(res.etag().map(str::to_string), etag);
        assert_eq!(res.body_text(), "hello &lt;world&gt;");
    }

    #[test]
    fn writes_after_close_are_ignored() {
        let mut res = ResponseBuffer::default();
        res.write("a");
        let mut res = closed(res);
        res.write("b");
        res.close(None).unwrap();
        assert_eq!(res.body_text(), "a");
    }

    #[test]
    fn push_pop_captures_only_inner_text() {
        let mut res = ResponseBuffer::default();
        res.write("outer-");
        res.push_buffer();
        res.write("inner");
        assert_eq!(res.pop_string().unwrap(), "inner");
        res.write("tail");
        assert_eq!(res.text(), "outer-tail");
    }

    #[test]
    fn nested_push_pop_without_outer_buffer() {
        let mut res = ResponseBuffer::default();
        res.push_buffer();
        res.write("a");
        res.push_buffer();
        res.write("b");
        assert_eq!(res.pop_string().unwrap(), "b");
        res.write("c");
        assert_eq!(res.pop_string().unwrap(), "ac");
        assert_eq!(res.text(), "");
        assert_eq!(res.pop_string(), Err(ResponseError::UnbalancedBuffer));
    }

    #[test]
    fn recycled_buffer_starts_empty() {
        let mut res = ResponseBuffer::default();
        res.push_buffer();
        res.write("first");
        res.pop_string().unwrap();
        res.push_buffer();
        assert_eq!(res.pop_string().unwrap(), "");
    }

    fn etag_for(body: &str) -> String {
        let mut probe = ResponseBuffer::default();
        probe.write(body);
        probe.close(None).unwrap();
        probe.etag().unwrap().to_string()
    }

    #[test]
    fn matching_etag_collapses_payload() {
        let etag = etag_for("same body");
        let mut res = ResponseBuffer::new(Conditional {
            etags: vec![etag],
            if_modified_since: None,
        });
        res.write("same body");
        res.close(None).unwrap();
        assert!(res.not_modified());
        assert_eq!(res.content_length(), 0);
    }

    #[test]
    fn cookies_disable_not_modified_shortcut() {
        let etag = etag_for("same body");
        let mut res = ResponseBuffer::new(Conditional {
            etags: vec![etag],
            if_modified_since: None,
        });
        res.write("same body");
        res.set_cookie("sid", Some("1"), None, None, None);
        res.close(None).unwrap();
        assert!(!res.not_modified());
        assert_eq!(res.body_text(), "same body");
    }

    #[test]
    fn no_auto_etag_for_errors_or_redirects() {
        let mut res = ResponseBuffer::default();
        res.set_status(500);
        let res = closed(res);
        assert!(res.etag().is_none());

        let mut res = ResponseBuffer::default();
        let _ = res.redirect("/next");
        let res = closed(res);
        assert!(res.etag().is_none());
    }

    #[test]
    fn explicit_etag_match_signals_not_modified() {
        let mut res = ResponseBuffer::new(Conditional {
            etags: vec!["\"v1\"".into()],
            if_modified_since: None,
        });
        assert!(res.set_etag("v2").is_ok());
        assert_eq!(res.set_etag("v1"), Err(RedirectSignal::not_modified()));
        assert!(res.not_modified());
    }

    #[test]
    fn last_modified_rounds_to_seconds() {
        let mut res = ResponseBuffer::new(Conditional {
            etags: Vec::new(),
            if_modified_since: Some(5_000),
        });
        assert!(res.set_last_modified(5_999).is_err());
        assert_eq!(res.last_modified(), Some(5_000));
    }

    #[test]
    fn debug_lines_only_for_html() {
        let mut res = ResponseBuffer::default();
        res.write("x");
        res.debug("note");
        let res = closed(res);
        assert!(res.body_text().contains("note"));

        let mut res = ResponseBuffer::default();
        res.set_content_type("text/plain");
        res.write("x");
        res.debug("note");
        let res = closed(res);
        assert_eq!(res.body_text(), "x");
    }

    #[test]
    fn charset_resolution_and_unknown_charset() {
        let mut res = ResponseBuffer::default();
        res.write("caf\u{e9}");
        res.close(Some("ISO-8859-1")).unwrap();
        assert_eq!(res.content().unwrap().as_ref(), b"caf\xe9");
        assert_eq!(res.content_type(), "text/html; charset=ISO-8859-1");

        let mut res = ResponseBuffer::default();
        res.set_charset("no-such-charset");
        res.write("caf\u{e9}");
        let err = res.close(None).unwrap_err();
        assert_eq!(err, ResponseError::UnsupportedCharset("no-such-charset".into()));
        assert_eq!(res.body_text(), "caf\u{e9}");
        assert!(res.encoding_error().is_some());
    }

    #[test]
    fn utf16_labels_produce_utf16_bytes() {
        let mut res = ResponseBuffer::default();
        res.set_charset("UTF-16LE");
        res.write("ab");
        res.close(None).unwrap();
        assert_eq!(res.content().unwrap().as_ref(), &[97, 0, 98, 0]);
        assert_eq!(res.content_type(), "text/html; charset=UTF-16LE");

        let mut res = ResponseBuffer::default();
        res.write("\u{e9}");
        res.close(Some("utf-16be")).unwrap();
        assert_eq!(res.content().unwrap().as_ref(), &[0x00, 0xe9]);
    }

    #[test]
    fn charset_follows_the_encoding_actually_used() {
        let mut res = ResponseBuffer::default();
        res.set_charset("iso-2022-kr");
        res.write("ab");
        res.close(None).unwrap();
        assert_eq!(res.content().unwrap().as_ref(), b"ab");
        assert_eq!(res.charset(), Some("UTF-8"));
    }

    #[test]
    fn write_binary_skips_encoding() {
        let mut res = ResponseBuffer::default();
        res.write("ignored");
        res.write_binary(vec![1u8, 2, 3]);
        res.close(None).unwrap();
        assert_eq!(res.content().unwrap().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut res = ResponseBuffer::default();
        res.write("x");
        res.set_status(404);
        res.set_cookie("a", Some("b"), None, None, None);
        res.set_error(Some("boom".into()));
        res.push_buffer();
        res.close(None).unwrap();
        res.reset();
        assert!(!res.is_closed());
        assert_eq!(res.status(), 200);
        assert_eq!(res.count_cookies(), 0);
        assert!(res.error().is_none());
        assert_eq!(res.nesting_depth(), 0);
        assert!(res.content().is_none());
        assert_eq!(res.text(), "");
    }

    #[test]
    fn report_error_respects_debug_and_suppression() {
        let mut res = ResponseBuffer::default();
        res.report_error("demo", "bad <thing>", Some("at line 1"), false, false);
        assert_eq!(res.status(), 500);
        assert!(res.text().contains("bad &lt;thing&gt;"));
        assert!(!res.text().contains("at line 1"));

        let mut res = ResponseBuffer::default();
        res.report_error("demo", "bad", Some("at line 1"), true, false);
        assert!(res.text().contains("at line 1"));

        let mut res = ResponseBuffer::default();
        res.report_error("demo", "bad", None, true, true);
        assert_eq!(res.status(), 500);
        assert_eq!(res.text(), "");
    }

    #[test]
    fn redirect_strips_line_breaks_and_sets_location() {
        let mut res = ResponseBuffer::default();
        let signal = res.redirect("/a\r\nX-Injected: 1");
        assert_eq!(signal.target(), Some("/aX-Injected: 1"));
        let headers = res.headers();
        assert!(headers.iter().any(|(k, v)| k == "Location" && v == "/aX-Injected: 1"));
    }
}
