//! The job dispatcher: drives `Target` state transitions and runs recipe commands against a
//! bounded pool of subprocess slots (the `-j N` value).
//!
//! The engine's own state (the `Makefile`, its `RuleMap`, and every `Target`) is owned and
//! mutated only from this single-threaded dispatch loop; the only concurrency is OS-level, in the
//! subprocesses a target's recipe spawns. This is the "cooperative single-threaded dispatcher"
//! design recorded in DESIGN.md: rather than modeling suspension with callbacks (as the original
//! `pymake.command`/`process` modules do) or real `async`, each ready target's in-flight recipe is
//! tracked as a small state struct ([`InFlightJob`]) polled with non-blocking `Child::try_wait`.

use std::collections::HashSet;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::context::Context;
use crate::error::MakeError;
use crate::makefile::rule_map::{Outcome, TargetState};
use crate::makefile::{Makefile, PreparedCommand};

/// How often the dispatch loop polls in-flight subprocesses when nothing else progressed on the
/// previous tick. Keeps the loop from busy-spinning a CPU core while recipe commands run.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of checking whether a target's prerequisites have all settled.
enum DepsStatus {
    /// At least one prerequisite hasn't reached `Done` yet.
    Pending,
    /// Every prerequisite is `Done`, and none failed.
    Ready,
    /// Every prerequisite is `Done`, but at least one failed.
    Failed,
}

/// A target whose recipe is currently executing (or about to). Commands for a single target run
/// strictly in sequence; only the target-to-target axis is parallel.
struct InFlightJob {
    target: String,
    commands: Vec<PreparedCommand>,
    next_index: usize,
    child: Option<Child>,
    failed: bool,
    ran_any: bool,
}

enum JobTick {
    StillRunning,
    Advanced,
    Finished { success: bool },
}

impl InFlightJob {
    fn new(target: String, commands: Vec<PreparedCommand>) -> Self {
        Self {
            target,
            commands,
            next_index: 0,
            child: None,
            failed: false,
            ran_any: false,
        }
    }

    /// Spawns (or skips, under `-n`) the next pending command. Returns `Ok(true)` if a process was
    /// actually spawned (so the caller should wait for it before advancing further).
    fn spawn_next(&mut self, mf: &mut Makefile, jobserver: &jobserver::Client) -> Result<(), MakeError> {
        while self.next_index < self.commands.len() {
            let command = self.commands[self.next_index].clone();
            let text = command.text.trim();
            if text.is_empty() {
                self.next_index += 1;
                continue;
            }

            if command.echo {
                println!("{text}");
            } else if mf.opts.just_print && !command.always_run {
                // `-n` shows even `@`-silenced commands, since its whole point is to preview
                // what would run.
                println!("{text}");
            }

            if let Some(t) = &mf.tracer {
                t.oncommandrun(&self.target, text);
            }

            let should_run = !mf.opts.just_print || command.always_run || is_submake(mf, text);
            if !should_run {
                self.next_index += 1;
                continue;
            }

            self.ran_any = true;
            let env = mf.exported_env()?;
            log::debug!("scheduler: spawning command for target '{}': {text}", self.target);
            let child = spawn_command(mf, &self.target, text, &env, jobserver)?;
            self.child = Some(child);
            return Ok(());
        }
        Ok(())
    }

    /// Polls the in-flight child (if any). A `None` child means every remaining command in this
    /// job was skipped outright (e.g. all `-n`-suppressed); such a job is immediately finished.
    fn tick(&mut self, mf: &mut Makefile, jobserver: &jobserver::Client) -> Result<JobTick, MakeError> {
        let Some(child) = self.child.as_mut() else {
            if self.next_index >= self.commands.len() {
                return Ok(JobTick::Finished { success: !self.failed });
            }
            self.spawn_next(mf, jobserver)?;
            return Ok(if self.child.is_some() || self.next_index >= self.commands.len() {
                JobTick::Advanced
            } else {
                JobTick::StillRunning
            });
        };

        match child.try_wait() {
            Ok(None) => Ok(JobTick::StillRunning),
            Ok(Some(status)) => {
                let command = &self.commands[self.next_index];
                let success = status.success() || command.ignore_errors;
                if let Some(t) = &mf.tracer {
                    t.onjobfinish(&self.target, success, status.code());
                }
                if !success {
                    self.failed = true;
                }
                self.child = None;
                self.next_index += 1;
                if self.failed || self.next_index >= self.commands.len() {
                    Ok(JobTick::Finished { success: !self.failed })
                } else {
                    self.spawn_next(mf, jobserver)?;
                    Ok(JobTick::Advanced)
                }
            }
            Err(e) => Err(MakeError::command(format!("Failed to wait on recipe command: {e}."), Context::new())),
        }
    }
}

/// A recipe line that references the current `$(MAKE)` always runs, even under `-n`, and always
/// propagates `MAKEFLAGS`/job-pool cooperation to the sub-make it invokes.
fn is_submake(mf: &Makefile, command_text: &str) -> bool {
    match mf.vars.get("MAKE").value.as_literal() {
        Some(make) if !make.is_empty() => command_text.contains(make),
        _ => false,
    }
}

fn spawn_command(
    mf: &Makefile,
    target: &str,
    text: &str,
    env: &[(String, String)],
    jobserver: &jobserver::Client,
) -> Result<Child, MakeError> {
    let shell = mf.vars.get("SHELL").value.as_literal().unwrap_or("/bin/sh").to_string();
    let shell_flags = mf.vars.get(".SHELLFLAGS").value.as_literal().unwrap_or("-c").to_string();

    let mut command = if needs_shell(text) {
        let mut c = Command::new(&shell);
        for flag in shell_flags.split_whitespace() {
            c.arg(flag);
        }
        c.arg(text);
        c
    } else {
        let mut words = text.split_whitespace();
        let Some(program) = words.next() else {
            return Err(MakeError::command("Empty recipe command.", Context::new()));
        };
        let mut c = Command::new(program);
        c.args(words);
        c
    };

    command.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

    // Every child gets the job-pool's fds/env, the same integration point `cargo` uses, so a
    // recursive `$(MAKE)` invoked by this command cooperates on our slot count instead of
    // spawning its own unbounded parallelism.
    jobserver.configure(&mut command);

    if let Some(t) = &mf.tracer {
        let argv: Vec<String> = text.split_whitespace().map(|s| s.to_string()).collect();
        t.onjobstart(target, &shell, &argv, needs_shell(text));
    }

    command.spawn().map_err(|e| {
        log::debug!("scheduler: failed to launch '{text}' for target '{target}': {e}");
        MakeError::command(format!("Failed to launch recipe command '{text}': {e}."), Context::new())
    })
}

/// Whether `cmd` needs the platform shell to interpret it, or can be exec'd directly (an
/// optimization the reference tool also permits for shell-metacharacter-free commands).
fn needs_shell(cmd: &str) -> bool {
    cmd.chars().any(|c| "|&;<>()$`\\\"'*?[]{}~!\n".contains(c))
}

/// Drives a set of requested targets (and everything they transitively depend on) to completion.
pub struct Scheduler {
    jobs: usize,
    keep_going: bool,
}

impl Scheduler {
    pub fn new(jobs: usize, keep_going: bool) -> Self {
        Self { jobs: jobs.max(1), keep_going }
    }

    /// Builds every target named in `targets`, plus their transitive prerequisites, respecting
    /// the `-j` parallelism limit. Targets run in dependency order; independent ready targets are
    /// dispatched in the order they became ready.
    pub fn run(&self, mf: &mut Makefile, targets: &[String]) -> Result<(), MakeError> {
        for name in targets {
            mf.gettarget(name)?;
        }

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        for name in targets {
            collect_order(mf, name, &mut visited, &mut visiting, &mut order, mf.logger.as_ref());
        }

        // Share this process's job pool with any recursive `$(MAKE)` sub-makes its recipes spawn,
        // the same cooperative-jobserver protocol GNU make itself uses. If we were ourselves
        // invoked as a sub-make under a parent's `-j`, inherit its pool via MAKEFLAGS instead of
        // minting a new one, so the whole tree shares a single slot count. Our own in-process
        // concurrency is gated simply by how many targets we've let into `in_flight`, not by
        // acquiring tokens ourselves, since the dispatcher never blocks waiting for one.
        let jobserver = match unsafe { jobserver::Client::from_env() } {
            Some(inherited) => {
                log::debug!("scheduler: inherited jobserver from parent MAKEFLAGS");
                inherited
            }
            None => {
                log::debug!("scheduler: starting own jobserver with {} slots", self.jobs);
                jobserver::Client::new(self.jobs)
                    .map_err(|e| MakeError::command(format!("Failed to start job server: {e}."), Context::new()))?
            }
        };

        let mut in_flight: Vec<InFlightJob> = Vec::new();
        let mut cancelled = false;
        let mut any_failure = false;
        let mut fatal: Option<MakeError> = None;

        loop {
            if !cancelled && fatal.is_none() {
                'dispatch: for name in &order {
                    if in_flight.len() >= self.jobs {
                        break 'dispatch;
                    }
                    if in_flight.iter().any(|j| &j.target == name) {
                        continue;
                    }
                    if matches!(mf.targets[name].state, TargetState::Running | TargetState::Done(_)) {
                        continue;
                    }

                    match deps_status(mf, name) {
                        DepsStatus::Pending => {
                            log::trace!("scheduler: '{name}' still pending on prerequisites");
                            continue;
                        }
                        DepsStatus::Failed => {
                            log::debug!("scheduler: '{name}' skipped, a prerequisite failed");
                            finish_target(mf, name, false, false);
                            any_failure = true;
                            continue;
                        }
                        DepsStatus::Ready => {}
                    }

                    if mf.targets[name].state == TargetState::New {
                        let err = MakeError::no_rule(format!("No rule to make target '{name}'."), Context::new());
                        if self.keep_going {
                            mf.logger.error(&err.msg, None);
                            finish_target(mf, name, false, false);
                            any_failure = true;
                            continue;
                        } else {
                            fatal = Some(err);
                            cancelled = true;
                            break 'dispatch;
                        }
                    }

                    mf.targets.get_mut(name.as_str()).unwrap().state = TargetState::Ready;

                    let commands = match mf.prepare_commands(name) {
                        Ok(c) => c,
                        Err(e) => {
                            if self.keep_going {
                                mf.logger.error(&e.msg, Some(&e.context));
                                finish_target(mf, name, false, false);
                                any_failure = true;
                                continue;
                            } else {
                                fatal = Some(e);
                                cancelled = true;
                                break 'dispatch;
                            }
                        }
                    };

                    if !mf.needs_build(name) || commands.is_empty() {
                        log::debug!("scheduler: '{name}' up to date, nothing to run");
                        finish_target(mf, name, true, false);
                        continue;
                    }

                    log::debug!("scheduler: dispatching '{name}' ({} in flight)", in_flight.len());
                    mf.targets.get_mut(name.as_str()).unwrap().state = TargetState::Running;
                    if let Some(t) = &mf.tracer {
                        t.ontargetmakebegin(name, mf.targets[name].vpath_target.as_deref());
                        t.ontargetprocessrules(name, mf.targets[name].rule_indices.len());
                        for idx in &mf.targets[name].rule_indices {
                            t.onrulecontextprocesscommands(name, *idx);
                        }
                    }

                    let mut job = InFlightJob::new(name.clone(), commands);
                    if let Err(e) = job.spawn_next(mf, &jobserver) {
                        if self.keep_going {
                            mf.logger.error(&e.msg, Some(&e.context));
                            finish_target(mf, name, false, false);
                            any_failure = true;
                            continue;
                        } else {
                            fatal = Some(e);
                            cancelled = true;
                            break 'dispatch;
                        }
                    }
                    in_flight.push(job);
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let mut progressed = false;
            let mut i = 0;
            while i < in_flight.len() {
                let tick = in_flight[i].tick(mf, &jobserver);
                match tick {
                    Ok(JobTick::StillRunning) => {
                        i += 1;
                    }
                    Ok(JobTick::Advanced) => {
                        progressed = true;
                        i += 1;
                    }
                    Ok(JobTick::Finished { success }) => {
                        progressed = true;
                        let job = in_flight.remove(i);
                        log::debug!("scheduler: '{}' finished (success={success})", job.target);
                        finish_target(mf, &job.target, success, job.ran_any);
                        if !success {
                            any_failure = true;
                            if !self.keep_going {
                                cancelled = true;
                            }
                        }
                    }
                    Err(e) => {
                        progressed = true;
                        let job = in_flight.remove(i);
                        mf.logger.error(&e.msg, Some(&e.context));
                        finish_target(mf, &job.target, false, job.ran_any);
                        any_failure = true;
                        if self.keep_going {
                            // continue
                        } else {
                            fatal = Some(e);
                            cancelled = true;
                        }
                    }
                }
            }

            if !progressed {
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        if any_failure {
            return Err(MakeError::command("Build failed.", Context::new()));
        }
        Ok(())
    }
}

/// Marks `name` `Done`, refreshing its mtime and `was_remade` flag on success, and notifies the
/// tracer.
fn finish_target(mf: &mut Makefile, name: &str, success: bool, ran_commands: bool) {
    let vpath = mf.targets[name].vpath_target.clone();
    let outcome = if success { Outcome::Success } else { Outcome::Failure };

    if success && ran_commands {
        let fresh_mtime = mf.get_mtime(name, vpath.as_deref());
        let target = mf.targets.get_mut(name).unwrap();
        target.mtime = fresh_mtime.or(Some(std::time::SystemTime::now()));
        target.was_remade = true;
    }

    let target = mf.targets.get_mut(name).unwrap();
    target.state = TargetState::Done(outcome);

    if let Some(t) = &mf.tracer {
        t.ontargetfinish(name, vpath.as_deref(), if success { "success" } else { "failure" });
    }
}

/// Whether every prerequisite (and order-only prerequisite) of `name` has reached `Done`, and
/// whether any of them failed.
fn deps_status(mf: &Makefile, name: &str) -> DepsStatus {
    let target = &mf.targets[name];
    let mut any_failed = false;
    for dep in target.prereqs.iter().chain(target.order_only.iter()) {
        match mf.targets.get(dep).map(|t| &t.state) {
            Some(TargetState::Done(Outcome::Success)) => {}
            Some(TargetState::Done(Outcome::Failure)) => any_failed = true,
            _ => return DepsStatus::Pending,
        }
    }
    if any_failed {
        DepsStatus::Failed
    } else {
        DepsStatus::Ready
    }
}

/// Depth-first, dependency-first traversal producing a build order: every prerequisite appears
/// before the target that depends on it. A target already mid-traversal (a dependency cycle) is
/// logged and treated as already satisfied, matching GNU make's "Circular ... dependency dropped"
/// tolerance rather than failing the whole run.
fn collect_order(
    mf: &Makefile,
    name: &str,
    visited: &mut HashSet<String>,
    visiting: &mut HashSet<String>,
    order: &mut Vec<String>,
    logger: &dyn crate::logger::Logger,
) {
    if visited.contains(name) {
        return;
    }
    if !visiting.insert(name.to_string()) {
        logger.warn(format!("Circular dependency dropped for target '{name}'."), None);
        return;
    }

    if let Some(target) = mf.targets.get(name) {
        for dep in target.prereqs.iter().chain(target.order_only.iter()) {
            collect_order(mf, dep, visited, visiting, order, logger);
        }
    }

    visiting.remove(name);
    visited.insert(name.to_string());
    order.push(name.to_string());
}
