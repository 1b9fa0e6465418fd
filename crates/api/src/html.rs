//! Server-side HTML for the dashboard view model. Every piece of model text goes through
//! [`escape`].

use auditor_core::render::{risk_class, Dashboard, PRODUCT_NAME};

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 2rem; color: #2c3e50; }
.header { font-size: 28px; font-weight: bold; margin-bottom: 10px; }
.subheader { font-size: 16px; color: #7f8c8d; }
.section-title { font-size: 20px; font-weight: bold; margin: 20px 0 10px; }
.risk-item { display: inline-block; margin-right: 2rem; }
.risk-high { color: #e74c3c; font-weight: bold; }
.risk-medium { color: #f39c12; font-weight: bold; }
.risk-low { color: #27ae60; font-weight: bold; }
.warning { background: #fff3cd; padding: 8px; }
table { width: 100%; border-collapse: collapse; margin: 10px 0 20px; }
th, td { border-bottom: 1px solid #eee; padding: 6px; text-align: left; vertical-align: top; }
.footer { font-size: 12px; color: #7f8c8d; margin-top: 40px; border-top: 1px solid #eee; padding-top: 10px; }
"#;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn dashboard_page(d: &Dashboard) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape(&d.header.title)));
    html.push_str(&format!("<style>{STYLE}</style>\n</head>\n<body>\n"));

    html.push_str(&format!(
        "<div class=\"header\">{}</div>\n<div class=\"subheader\"><strong>Analysed</strong><br>{}<br>{}<span style=\"float: right\">{}</span></div>\n<hr>\n",
        escape(&d.header.title),
        escape(&d.header.analysed),
        escape(&d.header.against),
        escape(&d.header.timestamp),
    ));

    let s = &d.risk_summary;
    html.push_str("<div class=\"section-title\">Risk Summary</div>\n<div>\n");
    html.push_str(&format!(
        "<span class=\"risk-item risk-high\">High Risk: {}</span>\
         <span class=\"risk-item risk-medium\">Medium Risk: {}</span>\
         <span class=\"risk-item risk-low\">Low Risk: {}</span>\
         <span class=\"risk-item\">Total Transactions: {}</span>\
         <span class=\"risk-item\">Flagged: {}</span>\
         <span class=\"risk-item\">Failure Rate: {}</span>\n</div>\n<hr>\n",
        s.high,
        s.medium,
        s.low,
        s.total,
        s.flagged,
        escape(&s.failure_rate),
    ));

    html.push_str("<div class=\"section-title\">Transaction Analysis</div>\n");
    let t = &d.transactions;
    match &t.warning {
        Some(warning) => html.push_str(&format!("<div class=\"warning\">{}</div>\n", escape(warning))),
        None => {
            html.push_str(
                "<table>\n<tr><th>Transaction ID</th><th>Risk Level</th><th>Violated Rules</th>\
                 <th>Explanation</th><th>Risk Score</th><th>Flagged</th></tr>\n",
            );
            for row in &t.rows {
                html.push_str(&format!(
                    "<tr><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    escape(&row.transaction_id),
                    risk_class(row.risk_level),
                    row.risk_level,
                    escape(&row.violated_rules),
                    escape(&row.explanation),
                    row.risk_score,
                    if row.flagged { "Yes" } else { "No" },
                ));
            }
            html.push_str("</table>\n");
        }
    }
    html.push_str(&format!(
        "<p><em>{}</em></p>\n<p><strong>Median Risk Score:</strong> {}</p>\n<hr>\n",
        escape(&t.entries_caption),
        escape(&t.median_risk),
    ));

    let f = &d.flagged;
    html.push_str("<div class=\"section-title\">Flagged Transactions</div>\n");
    html.push_str("<h4>Review Status</h4>\n");
    push_list(&mut html, f.review_status.iter().map(|s| escape(s)));
    html.push_str("<h4>Actions</h4>\n<ul>\n");
    for action in &f.actions {
        html.push_str(&format!("<li><strong>{}</strong>:", escape(&action.transaction_id)));
        push_list(&mut html, action.remediation.iter().map(|s| escape(s)));
        html.push_str("</li>\n");
    }
    html.push_str("</ul>\n<h4>Results</h4>\n");
    push_list(&mut html, f.results.iter().map(|s| escape(s)));
    html.push_str("<hr>\n");

    html.push_str("<div class=\"section-title\">Applied Rules</div>\n");
    match &d.rules.warning {
        Some(warning) => html.push_str(&format!("<div class=\"warning\">{}</div>\n", escape(warning))),
        None => {
            html.push_str("<table>\n<tr><th>Rule ID</th><th>Description</th><th>Severity</th></tr>\n");
            for rule in &d.rules.rows {
                html.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    escape(&rule.rule_id),
                    escape(&rule.description),
                    escape(&rule.severity),
                ));
            }
            html.push_str("</table>\n");
        }
    }
    html.push_str("<hr>\n");

    html.push_str("<div class=\"section-title\">Export Options</div>\n<div>\n");
    for export in &d.exports {
        html.push_str(&format!(
            "<button type=\"button\"{}>{}</button>\n",
            if export.enabled { "" } else { " disabled" },
            escape(&export.label),
        ));
    }
    html.push_str("</div>\n");

    html.push_str(&format!(
        "<div class=\"footer\"><strong>{}</strong></div>\n</body>\n</html>\n",
        escape(if d.footer.is_empty() { PRODUCT_NAME } else { d.footer.as_str() }),
    ));
    html
}

fn push_list(html: &mut String, items: impl Iterator<Item = String>) {
    html.push_str("<ul>\n");
    for item in items {
        html.push_str(&format!("<li>{item}</li>\n"));
    }
    html.push_str("</ul>\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditor_core::aggregate::{summarize, RiskPolicy};
    use auditor_core::domain::contract::parse_analysis;
    use auditor_core::render::render_dashboard;
    use serde_json::json;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<b>\"R&D\"</b> 'x'"), "&lt;b&gt;&quot;R&amp;D&quot;&lt;/b&gt; &#39;x&#39;");
    }

    #[test]
    fn model_text_is_escaped_in_the_page() {
        let policy = RiskPolicy::default();
        let doc = parse_analysis(
            json!({
                "rules_list": [{"ruleid": "R1", "description": "<script>alert(1)</script>", "origin": "a.pdf"}],
                "transactions_list": [{"transaction_id": "T<1>", "risk_score": 90, "flag": true}],
                "flagged_list": ["T<1>"]
            }),
            &policy,
        )
        .unwrap();
        let stats = summarize(&doc, &policy);
        let page = dashboard_page(&render_dashboard(&doc, &stats, &policy, chrono::Utc::now()));

        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(page.contains("T&lt;1&gt;: Needs Review"));
        assert!(page.contains("<td class=\"risk-high\">High</td>"));
        assert!(page.contains("<button type=\"button\" disabled>EXPORT CSV</button>"));
        assert!(page.contains("Auditor Assist 2.0"));
    }
}
