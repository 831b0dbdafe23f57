//! Message rendering per channel markup.

use std::fmt::Write as _;

use crate::decision::{Action, CheckStatus, Decision, Levels};

use super::{Payload, ReportDetail, ReportEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Plain,
    /// Discord / WeCom flavoured Markdown.
    Markdown,
    /// Slack mrkdwn.
    Slack,
    /// Telegram HTML parse mode.
    Html,
}

/// A message ready for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub title: String,
    pub body: String,
}

fn esc(m: Markup, s: &str) -> String {
    match m {
        Markup::Html => html_escape::encode_text(s).to_string(),
        _ => s.to_string(),
    }
}

fn bold(m: Markup, s: &str) -> String {
    match m {
        Markup::Plain => s.to_string(),
        Markup::Markdown => format!("**{s}**"),
        Markup::Slack => format!("*{s}*"),
        Markup::Html => format!("<b>{}</b>", esc(m, s)),
    }
}

fn marker(m: Markup, status: CheckStatus) -> &'static str {
    match (m, status) {
        (Markup::Plain, CheckStatus::Pass) => "[PASS]",
        (Markup::Plain, CheckStatus::Warn) => "[WARN]",
        (Markup::Plain, CheckStatus::Fail) => "[FAIL]",
        (_, CheckStatus::Pass) => "✅",
        (_, CheckStatus::Warn) => "⚠️",
        (_, CheckStatus::Fail) => "❌",
    }
}

fn action_label(a: Action) -> &'static str {
    match a {
        Action::Buy => "BUY",
        Action::Hold => "HOLD",
        Action::Sell => "SELL",
    }
}

fn levels_line(l: &Levels) -> Option<String> {
    let parts: Vec<String> = [("entry", l.entry), ("stop", l.stop), ("target", l.target)]
        .into_iter()
        .filter_map(|(k, v)| v.map(|x| format!("{k} {x:.4}")))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(format!("Levels: {}", parts.join(" | ")))
    }
}

fn render_decision(out: &mut String, d: &Decision, m: Markup, detail: ReportDetail) {
    let heading = format!("{} ({}) {}", d.name, d.code, action_label(d.action));
    let _ = writeln!(out, "{}", bold(m, &heading));
    let _ = writeln!(out, "{}", esc(m, &d.headline));
    for c in &d.checklist {
        let _ = writeln!(out, "{} {}", marker(m, c.status), esc(m, &c.condition));
    }
    if let Some(line) = levels_line(&d.levels) {
        let _ = writeln!(out, "{line}");
    }
    if detail == ReportDetail::Full && !d.narrative.trim().is_empty() {
        let _ = writeln!(out, "{}", esc(m, d.narrative.trim()));
    }
    let _ = writeln!(
        out,
        "Generated {} by {}",
        d.generated_at.format("%Y-%m-%d %H:%M UTC"),
        esc(m, &d.backend)
    );
}

/// Cut to `limit` characters, marking the cut.
pub fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Like [`truncate_chars`], but never leaves a partial entity or tag and
/// closes an open `<b>` for HTML.
pub fn truncate_markup(s: &str, m: Markup, limit: usize) -> String {
    const CLOSE_BOLD: &str = "</b>";
    if m != Markup::Html || s.chars().count() <= limit {
        return truncate_chars(s, limit);
    }
    let keep = limit.saturating_sub(1 + CLOSE_BOLD.len());
    let mut out: String = s.chars().take(keep).collect();
    for (open, close) in [('<', '>'), ('&', ';')] {
        if let Some(i) = out.rfind(open) {
            if !out[i..].contains(close) {
                out.truncate(i);
            }
        }
    }
    if out.matches("<b>").count() > out.matches(CLOSE_BOLD).count() {
        out.push_str(CLOSE_BOLD);
    }
    out.push('…');
    out
}

pub fn render(payload: &Payload, m: Markup, detail: ReportDetail, limit: usize) -> Rendered {
    let mut body = String::with_capacity(1_024);
    let title = match payload {
        Payload::Single(d) => {
            render_decision(&mut body, d, m, detail);
            format!("{} ({}): {}", d.name, d.code, action_label(d.action))
        }
        Payload::Dashboard { entries, overview } => {
            let _ = writeln!(body, "{}", bold(m, &overview.header_line()));
            for e in entries {
                body.push('\n');
                match e {
                    ReportEntry::Decided(d) => render_decision(&mut body, d, m, detail),
                    ReportEntry::Failed { code, name, reason } => {
                        let _ = writeln!(
                            body,
                            "{} {} failed: {}",
                            marker(m, CheckStatus::Fail),
                            bold(m, &format!("{name} ({code})")),
                            esc(m, reason)
                        );
                    }
                }
            }
            format!("Fund dashboard {}", overview.generated_at.format("%Y-%m-%d"))
        }
    };

    Rendered {
        title,
        body: truncate_markup(body.trim_end(), m, limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Instrument;

    fn decision() -> Decision {
        Decision::new(&Instrument::new("005827").named("Blue <Chip>"), Action::Hold, "Wait for pullback")
            .with_check("chase-high", CheckStatus::Fail)
            .with_check("trend", CheckStatus::Pass)
            .with_levels(Some(1.95), Some(1.8), None)
            .with_narrative("Long reasoning.")
            .from_backend("gemini")
    }

    #[test]
    fn single_plain_simple_omits_narrative() {
        let r = render(&Payload::Single(decision()), Markup::Plain, ReportDetail::Simple, 4_000);
        assert_eq!(r.title, "Blue <Chip> (005827): HOLD");
        assert!(r.body.contains("[FAIL] chase-high"));
        assert!(r.body.contains("[PASS] trend"));
        assert!(r.body.contains("Levels: entry 1.9500 | stop 1.8000"));
        assert!(!r.body.contains("Long reasoning"));

        let full = render(&Payload::Single(decision()), Markup::Plain, ReportDetail::Full, 4_000);
        assert!(full.body.contains("Long reasoning."));
    }

    #[test]
    fn html_escapes_names() {
        let r = render(&Payload::Single(decision()), Markup::Html, ReportDetail::Simple, 4_000);
        assert!(r.body.contains("<b>Blue &lt;Chip&gt; (005827) HOLD</b>"));
        assert!(r.body.contains("❌ chase-high"));
    }

    #[test]
    fn dashboard_starts_with_header() {
        let p = Payload::dashboard(vec![
            ReportEntry::Decided(decision()),
            ReportEntry::Failed {
                code: "000001".into(),
                name: "Broken".into(),
                reason: "data unavailable".into(),
            },
        ]);
        let r = render(&p, Markup::Markdown, ReportDetail::Simple, 4_000);
        assert!(r.body.starts_with("**2 instruments | buy:0 hold:1 sell:0 failed:1**"));
        assert!(r.body.contains("❌ **Broken (000001)** failed: data unavailable"));
    }

    /// Only `<b>`/`</b>` tags, balanced, and complete entities.
    fn is_valid_telegram_html(s: &str) -> bool {
        let mut open = false;
        let mut rest = s;
        while let Some(i) = rest.find(['<', '&']) {
            rest = &rest[i..];
            if let Some(r) = rest.strip_prefix("<b>") {
                if open {
                    return false;
                }
                open = true;
                rest = r;
            } else if let Some(r) = rest.strip_prefix("</b>") {
                if !open {
                    return false;
                }
                open = false;
                rest = r;
            } else if let Some(e) = ["&amp;", "&lt;", "&gt;", "&quot;"]
                .into_iter()
                .find(|e| rest.starts_with(e))
            {
                rest = &rest[e.len()..];
            } else {
                return false;
            }
        }
        !open
    }

    #[test]
    fn html_cut_never_splits_entities_or_tags() {
        let entries = (0..60)
            .map(|i| {
                if i % 2 == 0 {
                    ReportEntry::Failed {
                        code: format!("{i:06}"),
                        name: format!("Growth & <Income> {i}"),
                        reason: "data unavailable & <retry>".into(),
                    }
                } else {
                    ReportEntry::Decided(decision())
                }
            })
            .collect();
        let p = Payload::dashboard(entries);
        let full = render(&p, Markup::Html, ReportDetail::Simple, usize::MAX);
        assert!(is_valid_telegram_html(&full.body));
        let len = full.body.chars().count();
        assert!(len > 400);

        for limit in (len / 2 - 60)..(len / 2 + 60) {
            let r = render(&p, Markup::Html, ReportDetail::Simple, limit);
            assert!(r.body.chars().count() <= limit, "limit {limit}");
            assert!(r.body.ends_with('…'));
            assert!(is_valid_telegram_html(&r.body), "limit {limit}: {:?}", r.body);
        }
    }

    #[test]
    fn truncates_to_limit() {
        let r = render(&Payload::Single(decision()), Markup::Plain, ReportDetail::Full, 20);
        assert_eq!(r.body.chars().count(), 20);
        assert!(r.body.ends_with('…'));
    }
}
