use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// Point-in-time copy of every gauge and counter.
///
/// This is also the on-disk layout of the persistence file:
/// `{"gauge": {...}, "counter": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauge: BTreeMap<String, f64>,
    #[serde(default)]
    pub counter: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.gauge.is_empty() && self.counter.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gauge.len() + self.counter.len()
    }

    /// Plain HTML page served on `GET /`.
    pub fn render_html(&self) -> String {
        let mut out = String::with_capacity(64 + self.len() * 48);
        out.push_str("<html><head><title>Metrics</title></head><body>\n");

        out.push_str("<h2>Gauges</h2>\n<ul>\n");
        for (name, value) in &self.gauge {
            let _ = writeln!(out, "<li>{}: {}</li>", escape(name), value);
        }
        out.push_str("</ul>\n<h2>Counters</h2>\n<ul>\n");
        for (name, value) in &self.counter {
            let _ = writeln!(out, "<li>{}: {}</li>", escape(name), value);
        }
        out.push_str("</ul>\n</body></html>\n");
        out
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_layout_accepts_integer_gauges() {
        let snap: Snapshot =
            serde_json::from_str(r#"{"gauge":{"x":2},"counter":{"y":4}}"#).unwrap();
        assert_eq!(snap.gauge["x"], 2.0);
        assert_eq!(snap.counter["y"], 4);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let snap: Snapshot = serde_json::from_str(r#"{"counter":{"y":4}}"#).unwrap();
        assert!(snap.gauge.is_empty());
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn html_lists_names_sorted_and_escaped() {
        let mut snap = Snapshot::default();
        snap.gauge.insert("b".into(), 1.5);
        snap.gauge.insert("a<script>".into(), 0.5);
        snap.counter.insert("hits".into(), 12);

        let html = snap.render_html();
        let a = html.find("a&lt;script&gt;: 0.5").unwrap();
        let b = html.find("<li>b: 1.5</li>").unwrap();
        assert!(a < b);
        assert!(html.contains("<li>hits: 12</li>"));
    }
}
