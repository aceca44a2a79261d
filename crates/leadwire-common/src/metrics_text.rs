//! Renders the process-wide prometheus registry as text exposition
//! format, for the `/metrics` http endpoint.
use prometheus::Encoder;

pub fn render() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&metric_families, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
