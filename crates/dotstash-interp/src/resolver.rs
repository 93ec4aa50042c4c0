// ABOUTME: Expands `${ref}` value references and `$(ref)` command references in stored strings.
// ABOUTME: Tracks the chain of visited paths and a depth budget so cycles fail instead of recursing forever.

use std::collections::HashMap;
use std::time::Duration;

use dotstash_core::config::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_DEPTH};
use dotstash_core::value::{self, Branch, FlatMap, Value};
use dotstash_core::{EncryptionProbe, StashConfig, path};
use dotstash_store::StorageEngine;

use crate::error::ResolveError;
use crate::runner::{CommandRunner, RunError};

/// Command output keyed by canonical path, shared by everything resolved
/// under one top-level call.
type CommandCache = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Value(&'a str),
    Command(&'a str),
}

fn has_markers(text: &str) -> bool {
    text.contains("${") || text.contains("$(")
}

/// Split `text` into literal runs and reference tokens. An opening marker
/// without its closing delimiter, or with nothing inside, stays literal.
fn tokenize(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('$') {
        let at = pos + offset;
        let (close, is_command) = match bytes.get(at + 1) {
            Some(b'{') => ('}', false),
            Some(b'(') => (')', true),
            _ => {
                pos = at + 1;
                continue;
            }
        };
        let body_start = at + 2;
        let Some(len) = text[body_start..].find(close) else {
            pos = at + 1;
            continue;
        };
        let end = body_start + len + 1;
        let reference = text[body_start..body_start + len].trim();
        if reference.is_empty() {
            pos = end;
            continue;
        }

        if literal_start < at {
            segments.push(Segment::Literal(&text[literal_start..at]));
        }
        segments.push(if is_command {
            Segment::Command(reference)
        } else {
            Segment::Value(reference)
        });
        pos = end;
        literal_start = end;
    }

    if literal_start < text.len() {
        segments.push(Segment::Literal(&text[literal_start..]));
    }
    segments
}

fn trim_trailing_newline(mut stdout: String) -> String {
    if stdout.ends_with("\r\n") {
        stdout.truncate(stdout.len() - 2);
    } else if stdout.ends_with('\n') {
        stdout.pop();
    }
    stdout
}

/// Reference expander reading through a `StorageEngine`.
pub struct Resolver<'a> {
    engine: &'a StorageEngine,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn EncryptionProbe,
    max_depth: usize,
    timeout: Duration,
}

impl<'a> Resolver<'a> {
    pub fn new(
        engine: &'a StorageEngine,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn EncryptionProbe,
    ) -> Self {
        Self {
            engine,
            runner,
            probe,
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Resolver using the depth and timeout limits from `config`.
    pub fn from_config(
        engine: &'a StorageEngine,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn EncryptionProbe,
        config: &StashConfig,
    ) -> Self {
        Self::new(engine, runner, probe)
            .with_max_depth(config.max_depth)
            .with_timeout(config.command_timeout)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expand every reference in `text`.
    pub fn interpolate(&self, text: &str) -> Result<String, ResolveError> {
        self.interpolate_from(Vec::new(), text)
    }

    /// Expand `text` that was read from `key`, so a reference back to `key`
    /// is reported as circular.
    pub fn interpolate_key(&self, key: &str, text: &str) -> Result<String, ResolveError> {
        let origin = self.engine.aliases().resolve(key)?;
        self.interpolate_from(vec![origin], text)
    }

    fn interpolate_from(&self, mut chain: Vec<String>, text: &str) -> Result<String, ResolveError> {
        if self.probe.is_encrypted(text) {
            return Ok(text.to_string());
        }
        let mut cache = CommandCache::new();
        self.expand(text, self.max_depth, &mut chain, &mut cache)
    }

    /// Expand every leaf of `branch`. A leaf that fails to resolve keeps its
    /// raw value; encrypted leaves are never touched.
    ///
    /// The branch's location is unknown here, so leaf names are not treated
    /// as stored paths for cycle detection.
    pub fn interpolate_subtree(&self, branch: &Branch) -> Branch {
        self.expand_leaves(None, branch)
    }

    /// As `interpolate_subtree`, for a branch read from `root`. Leaves are
    /// seeded with their full path for cycle detection.
    pub fn interpolate_subtree_at(&self, root: &str, branch: &Branch) -> Branch {
        self.expand_leaves(Some(root), branch)
    }

    fn expand_leaves(&self, root: Option<&str>, branch: &Branch) -> Branch {
        let mut cache = CommandCache::new();
        let mut resolved = FlatMap::new();

        for (relative, raw) in value::flatten(branch) {
            if self.probe.is_encrypted(&raw) || !has_markers(&raw) {
                resolved.insert(relative, raw);
                continue;
            }
            let full = match root {
                Some(root) => path::join(root, &relative),
                None => relative.clone(),
            };
            let mut chain = match root {
                Some(_) => vec![full.clone()],
                None => Vec::new(),
            };
            let leaf = match self.expand(&raw, self.max_depth, &mut chain, &mut cache) {
                Ok(expanded) => expanded,
                Err(e) => {
                    tracing::debug!("keeping raw value of '{}': {}", full, e);
                    raw
                }
            };
            resolved.insert(relative, leaf);
        }

        value::unflatten(&resolved)
    }

    fn expand(
        &self,
        text: &str,
        depth: usize,
        chain: &mut Vec<String>,
        cache: &mut CommandCache,
    ) -> Result<String, ResolveError> {
        if !has_markers(text) {
            return Ok(text.to_string());
        }

        let segments = tokenize(text);
        let mut pieces = Vec::with_capacity(segments.len());

        for segment in &segments {
            pieces.push(match *segment {
                Segment::Literal(literal) => literal.to_string(),
                Segment::Value(reference) => self.substitute_value(reference, depth, chain, cache)?,
                Segment::Command(_) => String::new(),
            });
        }

        for (piece, segment) in pieces.iter_mut().zip(&segments) {
            if let Segment::Command(reference) = *segment {
                *piece = self.substitute_command(reference, depth, chain, cache)?;
            }
        }

        Ok(pieces.concat())
    }

    /// Canonical path and raw leaf for `reference`, after every check that
    /// guards following it.
    fn target(
        &self,
        reference: &str,
        depth: usize,
        chain: &[String],
    ) -> Result<(String, String), ResolveError> {
        let canonical = self.engine.aliases().resolve(reference)?;

        if chain.contains(&canonical) {
            let mut cycle = chain.to_vec();
            cycle.push(canonical);
            return Err(ResolveError::Circular { chain: cycle });
        }

        let raw = match self.engine.get(&canonical)? {
            None => {
                return Err(ResolveError::NotFound {
                    reference: reference.to_string(),
                });
            }
            Some(Value::Branch(_)) => {
                return Err(ResolveError::NotALeaf {
                    reference: reference.to_string(),
                });
            }
            Some(Value::Leaf(raw)) => raw,
        };

        if self.probe.is_encrypted(&raw) {
            return Err(ResolveError::Encrypted {
                reference: reference.to_string(),
            });
        }

        if depth == 0 {
            return Err(ResolveError::DepthExceeded {
                reference: reference.to_string(),
                limit: self.max_depth,
            });
        }

        Ok((canonical, raw))
    }

    /// Expand `raw` one level deeper with `canonical` on the chain.
    fn descend(
        &self,
        canonical: String,
        raw: &str,
        depth: usize,
        chain: &mut Vec<String>,
        cache: &mut CommandCache,
    ) -> Result<String, ResolveError> {
        chain.push(canonical);
        let expanded = self.expand(raw, depth - 1, chain, cache);
        chain.pop();
        expanded
    }

    fn substitute_value(
        &self,
        reference: &str,
        depth: usize,
        chain: &mut Vec<String>,
        cache: &mut CommandCache,
    ) -> Result<String, ResolveError> {
        let (canonical, raw) = self.target(reference, depth, chain)?;
        self.descend(canonical, &raw, depth, chain, cache)
    }

    fn substitute_command(
        &self,
        reference: &str,
        depth: usize,
        chain: &mut Vec<String>,
        cache: &mut CommandCache,
    ) -> Result<String, ResolveError> {
        let canonical = self.engine.aliases().resolve(reference)?;
        if let Some(output) = cache.get(&canonical) {
            return Ok(output.clone());
        }

        let (canonical, raw) = self.target(reference, depth, chain)?;
        let command = self.descend(canonical.clone(), &raw, depth, chain, cache)?;
        let output = self.execute(&canonical, &command)?;
        cache.insert(canonical, output.clone());
        Ok(output)
    }

    fn execute(&self, path: &str, command: &str) -> Result<String, ResolveError> {
        tracing::debug!("running command stored at '{}'", path);
        let output = match self.runner.run(command, self.timeout) {
            Ok(output) => output,
            Err(RunError::Timeout(timeout)) => {
                return Err(ResolveError::CommandTimeout {
                    path: path.to_string(),
                    timeout,
                });
            }
            Err(RunError::Spawn(source)) => {
                return Err(ResolveError::Spawn {
                    path: path.to_string(),
                    source,
                });
            }
        };

        if output.exit_code != 0 {
            return Err(ResolveError::CommandFailed {
                path: path.to_string(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(trim_trailing_newline(output.stdout))
    }
}
