//! TwiML instruction documents.
//!
//! Every webhook answer is a `<Response>` holding an ordered list of verbs.
//! Text and URLs are XML-escaped on render; the HTTP response carries the
//! `text/xml` content type the telephony platform expects.

use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use std::borrow::Cow;
use std::fmt::Write;

/// Speech-recognition capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gather {
    /// Path the platform posts the recognized speech to.
    pub action: String,
    /// Seconds of initial silence before giving up.
    pub timeout_secs: u32,
    /// BCP-47 recognition language, e.g. `en-US`.
    pub language: String,
}

/// Audio-recording capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Path the platform posts the recording reference to.
    pub action: String,
    pub max_length_secs: u32,
    /// Seconds of silence that end the recording.
    pub timeout_secs: u32,
    pub play_beep: bool,
}

/// One TwiML verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say(String),
    Play(String),
    Gather(Gather),
    Record(Record),
    Redirect(String),
}

/// A TwiML `<Response>` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Play(url.into()));
        self
    }

    pub fn gather(mut self, gather: Gather) -> Self {
        self.verbs.push(Verb::Gather(gather));
        self
    }

    pub fn record(mut self, record: Record) -> Self {
        self.verbs.push(Verb::Record(record));
        self
    }

    pub fn redirect(mut self, path: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect(path.into()));
        self
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    pub fn render(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        if self.verbs.is_empty() {
            xml.push_str("<Response/>");
            return xml;
        }

        xml.push_str("<Response>");
        for verb in &self.verbs {
            // Writing to a String cannot fail.
            let _ = match verb {
                Verb::Say(text) => write!(xml, "<Say>{}</Say>", escape(text)),
                Verb::Play(url) => write!(xml, "<Play>{}</Play>", escape(url)),
                Verb::Gather(g) => write!(
                    xml,
                    r#"<Gather input="speech" action="{}" method="POST" timeout="{}" speechTimeout="auto" language="{}"/>"#,
                    escape(&g.action),
                    g.timeout_secs,
                    escape(&g.language)
                ),
                Verb::Record(r) => write!(
                    xml,
                    r#"<Record action="{}" method="POST" maxLength="{}" timeout="{}" playBeep="{}"/>"#,
                    escape(&r.action),
                    r.max_length_secs,
                    r.timeout_secs,
                    r.play_beep
                ),
                Verb::Redirect(path) => {
                    write!(xml, r#"<Redirect method="POST">{}</Redirect>"#, escape(path))
                }
            };
        }
        xml.push_str("</Response>");
        xml
    }
}

impl IntoResponse for VoiceResponse {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.render()).into_response()
    }
}

/// Escapes the five XML special characters.
fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_play_then_gather() {
        let xml = VoiceResponse::new()
            .play("https://host/audio/a.mp3")
            .gather(Gather {
                action: "/voice/input".into(),
                timeout_secs: 5,
                language: "en-US".into(),
            })
            .redirect("/voice/listen")
            .render();

        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#,
                r#"<Play>https://host/audio/a.mp3</Play>"#,
                r#"<Gather input="speech" action="/voice/input" method="POST" timeout="5" speechTimeout="auto" language="en-US"/>"#,
                r#"<Redirect method="POST">/voice/listen</Redirect>"#,
                r#"</Response>"#
            )
        );
    }

    #[test]
    fn renders_record() {
        let xml = VoiceResponse::new()
            .record(Record {
                action: "/voice/input".into(),
                max_length_secs: 30,
                timeout_secs: 3,
                play_beep: false,
            })
            .render();
        assert!(xml.contains(
            r#"<Record action="/voice/input" method="POST" maxLength="30" timeout="3" playBeep="false"/>"#
        ));
    }

    #[test]
    fn escapes_spoken_text() {
        let xml = VoiceResponse::new()
            .say(r#"Posters < $5 & "flyers" aren't"#)
            .render();
        assert!(xml.contains(
            "<Say>Posters &lt; $5 &amp; &quot;flyers&quot; aren&apos;t</Say>"
        ));
    }

    #[test]
    fn empty_response_is_self_closing() {
        assert!(VoiceResponse::new().render().ends_with("<Response/>"));
    }

    #[test]
    fn into_response_sets_xml_content_type() {
        let response = VoiceResponse::new().say("hi").into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/xml"
        );
    }
}
