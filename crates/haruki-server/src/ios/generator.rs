//! Text grammars of the supported proxy apps.

use indexmap::IndexMap;
use serde::Serialize;

use haruki_shared::constants::BACKTRACE_HOST;

use super::rules::{Rule, RuleKind, RuleSet};
use super::ProxyApp;

const MODULE_NAME: &str = "Haruki Toolbox Uploader";
const MODULE_DESC: &str = "Captures game data of the selected servers and uploads it to Haruki Toolbox";
const BACKTRACE_REJECT: &str = r"^https:\/\/submit\.backtrace\.io\/";

/// Header fields every module carries.
#[derive(Debug, Clone)]
pub struct ModuleMeta<'a> {
    pub author: &'a str,
    pub homepage: &'a str,
    /// `YYYY-MM-DD`
    pub date: String,
}

pub fn render(app: ProxyApp, rs: &RuleSet, meta: &ModuleMeta<'_>) -> Result<String, serde_yaml::Error> {
    Ok(match app {
        ProxyApp::Surge => surge(rs, meta),
        ProxyApp::Loon => loon(rs, meta),
        ProxyApp::QuantumultX => quantumult_x(rs, meta),
        ProxyApp::Stash => stash(rs, meta)?,
    })
}

fn mitm_hosts(rs: &RuleSet) -> Vec<String> {
    rs.hostnames
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(BACKTRACE_HOST))
        .map(str::to_string)
        .collect()
}

fn status_code(rule: &Rule) -> u16 {
    match rule.kind {
        RuleKind::Redirect => 307,
        _ => 302,
    }
}

/// Joins lines with a trailing newline on each.
fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn bang_header(meta: &ModuleMeta<'_>) -> Vec<String> {
    let mut lines = vec![format!("#!name={MODULE_NAME}"), format!("#!desc={MODULE_DESC}")];
    if !meta.homepage.is_empty() {
        lines.push(format!("#!homepage={}", meta.homepage));
    }
    lines.push(format!("#!author={}", meta.author));
    lines.push(format!("#!date={}", meta.date));
    lines.push(String::new());
    lines
}

/// `pattern target code` lines; Surge and Loon append `reject_line` as is.
fn plain_rewrites<'a>(rewrites: &'a [Rule], reject_line: String) -> impl Iterator<Item = String> + 'a {
    rewrites
        .iter()
        .map(|rule| format!("{} {} {}", rule.pattern, rule.target, status_code(rule)))
        .chain(std::iter::once(reject_line))
}

fn surge(rs: &RuleSet, meta: &ModuleMeta<'_>) -> String {
    let mut lines = bang_header(meta);
    lines.push("[MITM]".into());
    lines.push(format!("hostname = %APPEND% {}", mitm_hosts(rs).join(", ")));
    lines.push(String::new());

    lines.push("[URL Rewrite]".into());
    lines.extend(plain_rewrites(&rs.rewrites, format!("{BACKTRACE_REJECT} reject")));

    if !rs.scripts.is_empty() {
        lines.push(String::new());
        lines.push("[Script]".into());
        lines.extend(rs.scripts.iter().enumerate().map(|(i, rule)| {
            format!(
                "haruki-upload-{} = type=http-response,pattern={},requires-body=1,max-size=0,binary-body-mode=1,script-path={}",
                i + 1,
                rule.pattern,
                rule.target
            )
        }));
    }
    finish(lines)
}

fn loon(rs: &RuleSet, meta: &ModuleMeta<'_>) -> String {
    let mut lines = bang_header(meta);
    lines.push("[Rewrite]".into());
    lines.extend(plain_rewrites(&rs.rewrites, format!("{BACKTRACE_REJECT} reject")));
    lines.push(String::new());

    if !rs.scripts.is_empty() {
        lines.push("[Script]".into());
        lines.extend(rs.scripts.iter().enumerate().map(|(i, rule)| {
            format!(
                "http-response {} script-path={}, requires-body=true, binary-body-mode=true, tag=haruki-upload-{}",
                rule.pattern,
                rule.target,
                i + 1
            )
        }));
        lines.push(String::new());
    }

    lines.push("[MITM]".into());
    lines.push(format!("hostname = {}", mitm_hosts(rs).join(", ")));
    finish(lines)
}

/// Proxy mode only; script requests are rejected before rendering.
fn quantumult_x(rs: &RuleSet, meta: &ModuleMeta<'_>) -> String {
    let mut lines = vec![
        format!("; {MODULE_NAME}"),
        format!("; {MODULE_DESC}"),
        format!("; Author: {}", meta.author),
        format!("; Date: {}", meta.date),
        String::new(),
        "[rewrite_local]".into(),
    ];
    lines.extend(
        rs.rewrites
            .iter()
            .map(|rule| format!("{} url {} {}", rule.pattern, status_code(rule), rule.target)),
    );
    lines.push(format!("{BACKTRACE_REJECT} url reject"));
    lines.push(String::new());

    lines.push("[mitm]".into());
    lines.push(format!("hostname = {}", mitm_hosts(rs).join(", ")));
    finish(lines)
}

// ─── Stash override document ───

#[derive(Serialize)]
struct StashOverride {
    name: &'static str,
    desc: &'static str,
    http: StashHttp,
    #[serde(rename = "script-providers", skip_serializing_if = "IndexMap::is_empty")]
    script_providers: IndexMap<String, StashProvider>,
}

#[derive(Serialize)]
struct StashHttp {
    rewrite: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    script: Vec<StashScript>,
    mitm: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct StashScript {
    #[serde(rename = "match")]
    pattern: String,
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    require_body: bool,
    binary_mode: bool,
    timeout: u32,
}

#[derive(Serialize)]
struct StashProvider {
    url: String,
    interval: u32,
}

fn stash(rs: &RuleSet, meta: &ModuleMeta<'_>) -> Result<String, serde_yaml::Error> {
    let script_name = |i: usize| format!("haruki-upload-{}", i + 1);

    let doc = StashOverride {
        name: MODULE_NAME,
        desc: MODULE_DESC,
        http: StashHttp {
            rewrite: plain_rewrites(&rs.rewrites, format!("{BACKTRACE_REJECT} - reject")).collect(),
            script: rs
                .scripts
                .iter()
                .enumerate()
                .map(|(i, rule)| StashScript {
                    pattern: rule.pattern.clone(),
                    name: script_name(i),
                    kind: "response",
                    require_body: true,
                    binary_mode: true,
                    timeout: 60,
                })
                .collect(),
            mitm: mitm_hosts(rs),
        },
        script_providers: rs
            .scripts
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                (
                    script_name(i),
                    StashProvider {
                        url: rule.target.clone(),
                        interval: 86400,
                    },
                )
            })
            .collect(),
    };

    let body = serde_yaml::to_string(&doc)?;
    Ok(format!("# author: {}\n# date: {}\n{body}", meta.author, meta.date))
}
