//! Builds the call-control markup returned from `/voice` et al. Named
//! `voice_xml` rather than `twiml` since the wire format is the provider's
//! concern, not this system's (spec.md §1: "voice-response script
//! generation is described only as the output contract of the routing
//! decision").
use crate::voice_router::VoiceAction;

pub fn render(action: &VoiceAction, operator_number: &str, after_hours_message: Option<&str>) -> String {
    let body = match action {
        VoiceAction::RingOperator { ring_seconds } => format!(
            "<Dial timeout=\"{ring_seconds}\" action=\"/voice/status\">{}</Dial>",
            xml_escape(operator_number)
        ),
        VoiceAction::DialOperator => format!(
            "<Dial action=\"/voice/status\">{}</Dial>",
            xml_escape(operator_number)
        ),
        VoiceAction::PromptPressOneForOperator => {
            // `actionOnEmptyResult` forces a repost to `/voice` even when the
            // caller never presses a digit, so a timeout is observable to the
            // server (and gets its own idempotency key) instead of silently
            // falling through to whatever verb follows in this same document.
            "<Gather numDigits=\"1\" action=\"/voice?emergency_timeout=1\" actionOnEmptyResult=\"true\" timeout=\"8\">\
             <Say>This is an emergency line. Press 1 to reach someone now.</Say>\
             </Gather>"
                .to_string()
        }
        VoiceAction::PlayAfterHoursRecordVoicemail => format!(
            "<Say>{}</Say><Record action=\"/voice/voicemail\" maxLength=\"120\" />",
            xml_escape(after_hours_message.unwrap_or("Thanks for calling. Please leave a message after the tone."))
        ),
        VoiceAction::PlayAfterHoursSendMissedCallSms => format!(
            "<Say>{}</Say><Hangup/>",
            xml_escape(after_hours_message.unwrap_or("Thanks for calling. We'll text you shortly."))
        ),
    };
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{body}</Response>")
}

/// A terse, dispose-of-the-call response for cases we don't want to
/// branch further on (e.g. the missed-call branch itself, once its side
/// effects are already running).
pub fn acknowledge_and_hangup(message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Say>{}</Say><Hangup/></Response>",
        xml_escape(message)
    )
}

pub fn empty_ok() -> String {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>".to_string()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_operator_emits_dial_with_timeout() {
        let xml = render(&VoiceAction::RingOperator { ring_seconds: 15 }, "+15005550123", None);
        assert!(xml.contains("timeout=\"15\""));
        assert!(xml.contains("+15005550123"));
    }

    #[test]
    fn escapes_operator_number_safely() {
        // Defensive: phone numbers shouldn't contain XML metacharacters,
        // but the escaper must not choke if one ever does.
        let xml = render(&VoiceAction::DialOperator, "+1<555>", None);
        assert!(xml.contains("&lt;555&gt;"));
    }
}
