//! Template cache and argument substitution

use crate::config::{Action, ClientOp, TemplateSpec};
use parking_lot::RwLock;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(\d+)").expect("valid placeholder regex"))
}

/// Named action lists loaded from template documents
///
/// Readers always receive an owned copy of a complete entry.
#[derive(Debug, Clone, Default)]
pub struct TemplateCache {
    inner: Arc<RwLock<HashMap<String, Vec<Action>>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache every template, replacing entries with the same name
    pub fn insert_all(&self, templates: Vec<TemplateSpec>) {
        let mut inner = self.inner.write();
        for template in templates {
            inner.insert(template.name, template.actions);
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec<Action>> {
        self.inner.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Split an evaluated argument string into positional values
///
/// Arguments are comma separated. A token opening with `(` starts a value
/// that keeps absorbing tokens, comma-joined, until one closes with `)`.
/// The parentheses are dropped.
pub fn split_args(evaluated: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut group: Option<String> = None;

    for token in evaluated.split(',') {
        let token = token.trim();

        match group.take() {
            Some(mut open) => {
                open.push(',');
                match token.strip_suffix(')') {
                    Some(last) => {
                        open.push_str(last);
                        args.push(open);
                    }
                    None => {
                        open.push_str(token);
                        group = Some(open);
                    }
                }
            }
            None => match token.strip_prefix('(') {
                Some(rest) => match rest.strip_suffix(')') {
                    Some(single) => args.push(single.to_string()),
                    None => group = Some(rest.to_string()),
                },
                None => args.push(token.to_string()),
            },
        }
    }

    // an unclosed group still counts as a value
    if let Some(open) = group {
        args.push(open);
    }

    args
}

/// Replace exact `$N` placeholders with the N-th argument
///
/// Placeholders without a matching argument are left untouched.
pub fn substitute(text: &str, args: &[String]) -> String {
    if !text.contains('$') {
        return text.to_string();
    }
    placeholder_regex()
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| args.get(i))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn substitute_action(action: &Action, args: &[String]) -> Action {
    let sub = |text: &str| substitute(text, args);
    Action {
        describe: sub(&action.describe),
        image: sub(&action.image),
        command: sub(&action.command),
        wait: action.wait,
        before: sub(&action.before),
        entrypoint: sub(&action.entrypoint),
        requires: sub(&action.requires),
        concurrency: sub(&action.concurrency),
        duration: sub(&action.duration),
        alias: sub(&action.alias),
        repeat: action.repeat,
        until: sub(&action.until),
        include: sub(&action.include),
        template: sub(&action.template),
        args: sub(&action.args),
        test: sub(&action.test),
        scope: sub(&action.scope),
        foreach: action.foreach.clone(),
        client: ClientOp {
            op: sub(&action.client.op),
            container: sub(&action.client.container),
            filename: sub(&action.client.filename),
            frompath: sub(&action.client.frompath),
            topath: sub(&action.client.topath),
        },
    }
}

/// Fill empty fields of a subordinate action from the invoking action
///
/// An explicit `false`, `0` or empty string on the subordinate is
/// indistinguishable from an omitted field and is overridden too.
fn inherit(mut action: Action, parent: &Action) -> Action {
    fn fill(field: &mut String, parent: &str) {
        if field.is_empty() {
            *field = parent.to_string();
        }
    }

    if !action.wait {
        action.wait = parent.wait;
    }
    fill(&mut action.before, &parent.before);
    fill(&mut action.requires, &parent.requires);
    fill(&mut action.concurrency, &parent.concurrency);
    fill(&mut action.duration, &parent.duration);
    fill(&mut action.alias, &parent.alias);
    if action.repeat == 0 {
        action.repeat = parent.repeat;
    }
    fill(&mut action.until, &parent.until);
    action
}

/// Resolve a template body against the invoking action and its arguments
pub fn expand_template(template: &[Action], invoking: &Action, args: &[String]) -> Vec<Action> {
    template
        .iter()
        .map(|action| inherit(substitute_action(action, args), invoking))
        .collect()
}
