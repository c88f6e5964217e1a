//! Interception rules shared by every proxy app grammar.

use haruki_shared::{Server, UploadDataType};

use super::{ModuleRequest, UploadMode};
use crate::config::SekaiClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// 307 to the backend proxy surface.
    Redirect,
    /// In-place URL rewrite on the game host (302).
    Rewrite,
    /// Response script that posts the body in chunks.
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub pattern: String,
    pub target: String,
    pub kind: RuleKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub rewrites: Vec<Rule>,
    pub scripts: Vec<Rule>,
    pub hostnames: Vec<String>,
}

impl RuleSet {
    fn push(&mut self, rule: Rule) {
        match rule.kind {
            RuleKind::Script => self.scripts.push(rule),
            RuleKind::Redirect | RuleKind::Rewrite => self.rewrites.push(rule),
        }
    }
}

/// MITM hostnames of `regions`, deduplicated in first-seen order.
pub fn hostnames(regions: &[Server], hosts: &SekaiClientConfig) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for region in regions {
        for host in hosts.api_hosts(*region) {
            if !out.iter().any(|h| h == host) {
                out.push(host.to_string());
            }
        }
    }
    out
}

/// Builds the rule set of a module request against `endpoint`, the public
/// base URL devices should reach.
pub fn rule_set(req: &ModuleRequest, endpoint: &str, hosts: &SekaiClientConfig) -> RuleSet {
    let mut rs = RuleSet {
        hostnames: hostnames(&req.regions, hosts),
        ..Default::default()
    };
    let script_url = format!(
        "{endpoint}/ios/script/{}/haruki-toolbox.js?chunk={}&endpoint={}",
        req.upload_code,
        req.chunk_size_mb,
        req.endpoint.as_str()
    );
    for region in &req.regions {
        for host in hosts.api_hosts(*region) {
            for data_type in &req.data_types {
                for rule in rules_for(host, *region, *data_type, req.mode, endpoint, &script_url) {
                    rs.push(rule);
                }
            }
        }
    }
    rs
}

fn rules_for(
    host: &str,
    region: Server,
    data_type: UploadDataType,
    mode: UploadMode,
    endpoint: &str,
    script_url: &str,
) -> Vec<Rule> {
    let escaped = regex::escape(host);
    let redirect = |pattern: String, target: String| Rule {
        pattern,
        target,
        kind: RuleKind::Redirect,
    };
    let script = |pattern: String| Rule {
        pattern,
        target: script_url.to_string(),
        kind: RuleKind::Script,
    };
    let mysekai_any = format!(
        r"^https://{escaped}/api/user/(\d+)/mysekai\?isForceAllReloadOnlyMysekai=(True|False)"
    );

    match (data_type, mode) {
        (UploadDataType::Suite, mode) => {
            let pattern = format!(r"^https://{escaped}/api/suite/user/(\d+)$");
            match mode {
                UploadMode::Proxy => vec![redirect(
                    pattern,
                    format!("{endpoint}/ios/proxy/{region}/suite/user/$1"),
                )],
                UploadMode::Script => vec![script(pattern)],
            }
        }
        (UploadDataType::Mysekai, UploadMode::Proxy) => vec![redirect(
            mysekai_any,
            format!("{endpoint}/ios/proxy/{region}/user/$1/mysekai?isForceAllReloadOnlyMysekai=$2"),
        )],
        (UploadDataType::Mysekai, UploadMode::Script) => vec![script(mysekai_any)],
        (UploadDataType::MysekaiForce, UploadMode::Proxy) => vec![redirect(
            mysekai_any,
            format!("{endpoint}/ios/proxy/{region}/user/$1/mysekai?isForceAllReloadOnlyMysekai=True"),
        )],
        (UploadDataType::MysekaiForce, UploadMode::Script) => vec![
            Rule {
                pattern: format!(
                    r"^https://{escaped}/api/user/(\d+)/mysekai\?isForceAllReloadOnlyMysekai=False"
                ),
                target: format!("https://{host}/api/user/$1/mysekai?isForceAllReloadOnlyMysekai=True"),
                kind: RuleKind::Rewrite,
            },
            script(format!(
                r"^https://{escaped}/api/user/(\d+)/mysekai\?isForceAllReloadOnlyMysekai=True"
            )),
        ],
        (UploadDataType::MysekaiBirthdayParty, mode) => {
            let pattern =
                format!(r"^https://{escaped}/api/user/(\d+)/mysekai/birthday-party/(\d+)/delivery");
            match mode {
                UploadMode::Proxy => vec![redirect(
                    pattern,
                    format!("{endpoint}/ios/proxy/{region}/user/$1/mysekai/birthday-party/$2/delivery"),
                )],
                UploadMode::Script => vec![script(pattern)],
            }
        }
    }
}
