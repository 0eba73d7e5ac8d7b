//! Fan-in and fan-out over the command log history.
//!
//! Files are linked to commands by content digest only, so a file that was
//! renamed or copied still connects. A branch never visits the same command
//! or the same (path, digest) twice, which keeps cyclic histories finite.

use super::log::{CommandLog, FileLog};
use super::store::CommandLogIndex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Which way a dependency edge points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Towards the commands that produced a file (fan-in).
    In,
    /// Towards the commands that consumed a file (fan-out).
    Out,
}

impl Direction {
    fn mark(self) -> char {
        match self {
            Direction::In => '<',
            Direction::Out => '>',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDependency {
    pub file: PathBuf,
    pub digest: String,
    pub direction: Direction,
    pub next: Vec<CommandDependency>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandDependency {
    pub command: CommandLog,
    pub direction: Direction,
    pub next: Vec<FileDependency>,
}

struct FileSlot {
    file: PathBuf,
    digest: String,
    commands: Vec<usize>,
}

struct CommandSlot {
    log: usize,
    files: Vec<usize>,
}

struct Pending {
    slot: usize,
    depth: usize,
    seen: HashSet<String>,
}

fn file_key(path: &Path, digest: &str) -> String {
    format!("file:{}:{}", path.display(), digest)
}

fn command_key(log: &CommandLog) -> String {
    format!("cmd:{}", log.command_string())
}

/// Queries a [`CommandLogIndex`] for file lineage.
pub struct CommandInspector<'a> {
    index: &'a CommandLogIndex,
    work_dir: PathBuf,
}

impl<'a> CommandInspector<'a> {
    /// `work_dir` is only used to shorten paths when printing.
    pub fn new(index: &'a CommandLogIndex, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            index,
            work_dir: work_dir.into(),
        }
    }

    /// Commands that produced `digest`, then what produced their inputs.
    pub fn fanin(&self, file: &Path, digest: &str, max_depth: usize) -> FileDependency {
        self.traverse(file, digest, max_depth, Direction::In)
    }

    /// Commands that consumed `digest`, then what consumed their outputs.
    pub fn fanout(&self, file: &Path, digest: &str, max_depth: usize) -> FileDependency {
        self.traverse(file, digest, max_depth, Direction::Out)
    }

    fn traverse(
        &self,
        file: &Path,
        digest: &str,
        max_depth: usize,
        direction: Direction,
    ) -> FileDependency {
        let logs = self.index.logs();
        let mut files = vec![FileSlot {
            file: file.to_path_buf(),
            digest: digest.to_string(),
            commands: Vec::new(),
        }];
        let mut commands: Vec<CommandSlot> = Vec::new();
        let mut stack = vec![Pending {
            slot: 0,
            depth: max_depth,
            seen: HashSet::new(),
        }];

        while let Some(Pending {
            slot,
            depth,
            mut seen,
        }) = stack.pop()
        {
            if depth == 0 {
                continue;
            }
            let current_digest = files[slot].digest.clone();
            seen.insert(file_key(&files[slot].file, &current_digest));

            for (log_idx, log) in logs.iter().enumerate() {
                let (matched, following): (&[FileLog], &[FileLog]) = match direction {
                    Direction::Out => (&log.in_files, &log.out_files),
                    Direction::In => (&log.out_files, &log.in_files),
                };
                if !matched.iter().any(|f| f.digest == current_digest) {
                    continue;
                }
                let cmd_key = command_key(log);
                if seen.contains(&cmd_key) {
                    continue;
                }
                let mut branch_seen = seen.clone();
                branch_seen.insert(cmd_key);

                let cmd_slot = commands.len();
                commands.push(CommandSlot {
                    log: log_idx,
                    files: Vec::new(),
                });
                files[slot].commands.push(cmd_slot);

                for next in following {
                    if branch_seen.contains(&file_key(&next.path, &next.digest)) {
                        continue;
                    }
                    let file_slot = files.len();
                    files.push(FileSlot {
                        file: next.path.clone(),
                        digest: next.digest.clone(),
                        commands: Vec::new(),
                    });
                    commands[cmd_slot].files.push(file_slot);
                    stack.push(Pending {
                        slot: file_slot,
                        depth: depth - 1,
                        seen: branch_seen.clone(),
                    });
                }
            }
        }

        // children always live at higher indices than their parent
        let mut built: Vec<Option<FileDependency>> = (0..files.len()).map(|_| None).collect();
        for idx in (0..files.len()).rev() {
            let slot = &files[idx];
            let next = slot
                .commands
                .iter()
                .map(|&c| CommandDependency {
                    command: logs[commands[c].log].clone(),
                    direction,
                    next: commands[c]
                        .files
                        .iter()
                        .filter_map(|&f| built[f].take())
                        .collect(),
                })
                .collect();
            built[idx] = Some(FileDependency {
                file: slot.file.clone(),
                digest: slot.digest.clone(),
                direction,
                next,
            });
        }
        built[0].take().unwrap_or(FileDependency {
            file: file.to_path_buf(),
            digest: digest.to_string(),
            direction,
            next: Vec::new(),
        })
    }

    /// Render a dependency tree, one line per node.
    pub fn render(&self, tree: &FileDependency) -> String {
        let mut out = String::new();
        let mut stack: Vec<(Node<'_>, usize)> = vec![(Node::File(tree), 0)];
        while let Some((node, indent)) = stack.pop() {
            let pad = "  ".repeat(indent);
            match node {
                Node::File(f) => {
                    let shown = f.file.strip_prefix(&self.work_dir).unwrap_or(&f.file);
                    out.push_str(&format!(
                        "{}{} {} {}\n",
                        pad,
                        f.direction.mark(),
                        shown.display(),
                        f.digest
                    ));
                    for c in f.next.iter().rev() {
                        stack.push((Node::Command(c), indent + 1));
                    }
                }
                Node::Command(c) => {
                    out.push_str(&format!(
                        "{}{} {}\n",
                        pad,
                        c.direction.mark(),
                        c.command.command_string()
                    ));
                    for f in c.next.iter().rev() {
                        stack.push((Node::File(f), indent + 1));
                    }
                }
            }
        }
        out
    }
}

enum Node<'t> {
    File(&'t FileDependency),
    Command(&'t CommandDependency),
}

impl fmt::Display for FileDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.file.display(), self.digest)
    }
}
