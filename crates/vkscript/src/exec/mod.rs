//! Script execution and device lifetime management
//!
//! The [`Executor`] is the lifetime arbiter: it keeps the context and
//! window alive across scripts and rebuilds them only when a script's
//! requirements or window format differ from the previous script's.
//! Front-ends use only this type.

pub mod test_run;

use crate::config::Config;
use crate::pipeline::PipelineSet;
use crate::requirements::Requirements;
use crate::result::TestResult;
use crate::script::parser;
use crate::script::source::Source;
use crate::script::Script;
use crate::vulkan::{Context, ExternalDevice, VulkanError, Window};
use test_run::TestRun;

/// Runs scripts against a device, reusing state across compatible runs
pub struct Executor {
    config: Config,
    external: Option<ExternalDevice>,
    // window before context: it must be destroyed while the device is
    // still alive
    window: Option<Window>,
    context: Option<Context>,
    prev_requirements: Option<Requirements>,
}

impl Executor {
    /// Create an executor with the given configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            external: None,
            window: None,
            context: None,
            prev_requirements: None,
        }
    }

    /// The executor's configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Run scripts on a device created by the caller instead of one the
    /// executor creates itself
    ///
    /// Scripts whose requirements the injected device does not satisfy
    /// are skipped rather than failed.
    pub fn set_device(&mut self, external: ExternalDevice) {
        self.window = None;
        self.context = None;
        self.prev_requirements = None;
        self.external = Some(external);
    }

    /// Parse and execute one script, reporting its result
    pub fn execute(&mut self, source: &Source) -> TestResult {
        let filename = source.filename();
        self.config.sink.before_test(&filename);
        let result = self.execute_inner(source);
        self.config.sink.after_test(&filename, result);
        result
    }

    fn execute_inner(&mut self, source: &Source) -> TestResult {
        let script = match parser::parse(source) {
            Ok(script) => script,
            Err(e) => {
                self.config.error(&e.to_string());
                return TestResult::Fail;
            }
        };

        // tear down whatever the new script cannot reuse
        let requirements_match = self
            .prev_requirements
            .as_ref()
            .map_or(false, |prev| prev == script.requirements());
        if self.context.is_some() && !requirements_match {
            log::debug!("[EXEC] Requirements changed, rebuilding context");
            self.window = None;
            self.context = None;
        }
        if let Some(window) = &self.window {
            if window.format() != script.window_format() {
                log::debug!("[EXEC] Window format changed, rebuilding window");
                self.window = None;
            }
        }

        if self.context.is_none() {
            match self.create_context(&script) {
                Ok(context) => self.context = Some(context),
                Err(ContextFailure::Skip(message)) => {
                    log::info!("[EXEC] {}: skip: {message}", script.filename());
                    return TestResult::Skip;
                }
                Err(ContextFailure::Fail(message)) => {
                    self.config.error(&message);
                    return TestResult::Fail;
                }
            }
            self.prev_requirements = Some(script.requirements().clone());
        }
        let Some(context) = self.context.as_ref() else {
            return TestResult::Fail;
        };

        if self.window.is_none() {
            match Window::new(context, script.window_format()) {
                Ok(window) => self.window = Some(window),
                Err(VulkanError::UnsupportedFormat(name)) => {
                    log::info!(
                        "[EXEC] {}: skip: unsupported format {name}",
                        script.filename()
                    );
                    return TestResult::Skip;
                }
                Err(e) => {
                    self.config.error(&e.to_string());
                    return TestResult::Fail;
                }
            }
        }
        let Some(window) = self.window.as_ref() else {
            return TestResult::Fail;
        };

        run_script(&mut self.config, context, window, &script)
    }

    fn create_context(&self, script: &Script) -> Result<Context, ContextFailure> {
        match &self.external {
            Some(external) => {
                let context = Context::from_external(external)
                    .map_err(|e| ContextFailure::Fail(e.to_string()))?;
                if !script
                    .requirements()
                    .check(context.instance(), context.physical_device())
                {
                    return Err(ContextFailure::Skip(
                        "device does not satisfy the script requirements".to_owned(),
                    ));
                }
                Ok(context)
            }
            None => Context::new(script.requirements())
                .map_err(|e| ContextFailure::Fail(e.to_string())),
        }
    }
}

fn run_script(
    config: &mut Config,
    context: &Context,
    window: &Window,
    script: &Script,
) -> TestResult {
    let pipelines = match PipelineSet::build(context, window, script, config.show_disassembly) {
        Ok(pipelines) => pipelines,
        Err(e) => {
            config.error(&e.to_string());
            return TestResult::Fail;
        }
    };

    match run_test(context, window, script, &pipelines, config) {
        Ok(result) => result,
        Err(message) => {
            config.error(&message);
            TestResult::Fail
        }
    }
}

fn run_test(
    context: &Context,
    window: &Window,
    script: &Script,
    pipelines: &PipelineSet,
    config: &mut Config,
) -> Result<TestResult, String> {
    let run = TestRun::new(context, window, script, pipelines, config).map_err(|e| e.to_string())?;
    match run.run() {
        Ok(true) => Ok(TestResult::Pass),
        Ok(false) => Ok(TestResult::Fail),
        Err(e) => Err(e.to_string()),
    }
}

enum ContextFailure {
    Skip(String),
    Fail(String),
}

#[cfg(test)]
mod tests {
    use crate::script::parser;
    use crate::script::source::Source;

    // context and window reuse are keyed on these equalities, so two
    // scripts with matching [require] sections share one device
    #[test]
    fn test_reuse_predicates_across_identical_requirements() {
        let a = parser::parse(&Source::from_string(
            "[require]\nfbsize 4 4\ngeometryShader\n[test]\nclear\n",
        ))
        .unwrap();
        let b = parser::parse(&Source::from_string(
            "[require]\nfbsize 4 4\ngeometryShader\n[test]\nprobe all rgba 0 0 0 0\n",
        ))
        .unwrap();
        assert_eq!(a.requirements(), b.requirements());
        assert_eq!(a.window_format(), b.window_format());

        let c = parser::parse(&Source::from_string(
            "[require]\nfbsize 8 4\ngeometryShader\n",
        ))
        .unwrap();
        assert_eq!(a.requirements(), c.requirements());
        assert_ne!(a.window_format(), c.window_format());
    }
}
