//! Renders the fixed set of outbound message bodies (missed-call
//! acknowledgements, after-hours notices, nudges, operator alerts, ...)
//! from named minijinja templates.
//!
//! Kept deliberately small and registry-based rather than loading from a
//! directory on disk: the set of templates this system needs is fixed and
//! known at compile time (spec'd in spec.md §4.10/§4.11/§4.12), unlike the
//! teacher's user-authored-policy template directories.
use minijinja::{context, Environment};
use rand::seq::SliceRandom;
use serde::Serialize;

/// Uniformly-random missed-call acknowledgement bodies. Varying the exact
/// wording across sends measurably improves SMS deliverability with
/// carriers that filter on repeated identical content (spec.md §4.10).
const MISSED_CALL_TEMPLATES: &[&str] = &[
    "missed_call_1",
    "missed_call_2",
    "missed_call_3",
];

pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template(
            "missed_call_1",
            "Hi, thanks for calling {{ tenant_name }}! Sorry we missed you — \
             we'll call back shortly. Reply STOP to unsubscribe.",
        )
        .unwrap();
        env.add_template(
            "missed_call_2",
            "Thanks for reaching out to {{ tenant_name }}. We missed your call \
             but we're on it — talk soon! Reply STOP to unsubscribe.",
        )
        .unwrap();
        env.add_template(
            "missed_call_3",
            "{{ tenant_name }} here — sorry we couldn't pick up! A team member \
             will follow up with you shortly. Reply STOP to unsubscribe.",
        )
        .unwrap();
        env.add_template(
            "after_hours_sms",
            "Thanks for calling {{ tenant_name }}. We're closed right now but \
             we received your call and will follow up during business hours. \
             Reply STOP to unsubscribe.",
        )
        .unwrap();
        env.add_template(
            "nudge_followup",
            "Just checking in — still need help from {{ tenant_name }}? Reply \
             here any time. Reply STOP to unsubscribe.",
        )
        .unwrap();
        env.add_template(
            "emergency_ack",
            "We've flagged your message to {{ tenant_name }} as urgent and a \
             team member will reach out right away. Reply STOP to unsubscribe.",
        )
        .unwrap();
        env.add_template(
            "standard_ack",
            "Thanks for your message! {{ tenant_name }} will get back to you \
             soon. Reply STOP to unsubscribe.",
        )
        .unwrap();
        env.add_template(
            "stop_confirmation",
            "You've been unsubscribed from {{ tenant_name }} messages and \
             won't receive further texts. Reply START to resubscribe.",
        )
        .unwrap();
        env.add_template(
            "help_response",
            "{{ tenant_name }}: msg & data rates may apply. Reply STOP to \
             unsubscribe, HELP for help. Contact us directly for urgent \
             matters.",
        )
        .unwrap();
        env.add_template(
            "start_confirmation",
            "You're resubscribed to {{ tenant_name }} messages. Reply STOP at \
             any time to opt out again.",
        )
        .unwrap();
        env.add_template(
            "review_positive",
            "So glad to hear it! Would you mind leaving us a review? \
             {{ review_link }} — thank you from {{ tenant_name }}!",
        )
        .unwrap();
        env.add_template(
            "review_negative_apology",
            "We're sorry to hear that. A member of the {{ tenant_name }} team \
             will reach out to make this right.",
        )
        .unwrap();
        env.add_template(
            "operator_alert_single",
            "Lead Alert: {{ customer_phone }} sent a message:\n---\n{{ text }}\n---",
        )
        .unwrap();
        env.add_template(
            "operator_alert_multi",
            "Lead Alert: {{ customer_phone }} sent {{ count }} messages:\n---\n{{ text }}\n---",
        )
        .unwrap();
        env.add_template(
            "operator_missed_call_alert",
            "Missed call from {{ caller }}. {{ detail }}",
        )
        .unwrap();
        env.add_template(
            "operator_voicemail_alert",
            "Voicemail from {{ caller }}: {{ recording_url }}",
        )
        .unwrap();
        env.add_template(
            "operator_urgent_alert",
            "URGENT — {{ caller }}: {{ text }}",
        )
        .unwrap();
        Self { env }
    }

    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> anyhow::Result<String> {
        let tmpl = self.env.get_template(name)?;
        Ok(tmpl.render(ctx)?)
    }

    /// Render one of the missed-call templates, chosen uniformly at
    /// random, per spec.md §4.10.
    pub fn render_missed_call(&self, tenant_name: &str) -> anyhow::Result<String> {
        let mut rng = rand::thread_rng();
        let name = MISSED_CALL_TEMPLATES
            .choose(&mut rng)
            .expect("non-empty template list");
        self.render(name, context! { tenant_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_named_templates_with_context() {
        let engine = TemplateEngine::new();
        let body = engine
            .render("after_hours_sms", context! { tenant_name => "Acme Plumbing" })
            .unwrap();
        assert!(body.contains("Acme Plumbing"));
        assert!(body.contains("STOP"));
    }

    #[test]
    fn missed_call_template_always_contains_tenant_name_and_stop() {
        let engine = TemplateEngine::new();
        for _ in 0..20 {
            let body = engine.render_missed_call("Acme Plumbing").unwrap();
            assert!(body.contains("Acme Plumbing"));
            assert!(body.to_lowercase().contains("stop"));
        }
    }
}
