use std::fmt;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bundle::{Aggregator, BundleContent, OutputBundle};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::domain::{DatasetDescriptor, PackMode, Selection};
use crate::error::PackError;
use crate::executor::Executor;
use crate::fs_util;
use crate::http::HttpClient;
use crate::manifest::Manifest;
use crate::ops::{FetchPlan, Layout};
use crate::script::Script;
use crate::sources::plan_for;
use crate::tool::ToolRunner;

#[derive(Debug, Clone)]
pub struct PackRequest {
    pub selection: Selection,
    pub mode: PackMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FetchStatus {
    Ok,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub descriptor: DatasetDescriptor,
    pub status: FetchStatus,
    pub output_path: Option<Utf8PathBuf>,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Resolving,
    Fetching { index: usize, total: usize },
    Aggregating,
    Done,
    RejectedEmptySelection,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::Resolving => write!(f, "Resolving"),
            PipelineState::Fetching { index, total } => {
                write!(f, "Fetching({}/{})", index + 1, total)
            }
            PipelineState::Aggregating => write!(f, "Aggregating"),
            PipelineState::Done => write!(f, "Done"),
            PipelineState::RejectedEmptySelection => write!(f, "RejectedEmptySelection"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub state: PipelineState,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct Pipeline<H: HttpClient, T: ToolRunner> {
    catalog: Catalog,
    config: Config,
    executor: Executor<H, T>,
}

impl<H: HttpClient, T: ToolRunner> Pipeline<H, T> {
    pub fn new(catalog: Catalog, config: Config, http: H, tools: T) -> Self {
        Self {
            catalog,
            config,
            executor: Executor::new(http, tools),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Plans for the selection, laid out as the generated script would run
    /// them. Nothing is fetched.
    pub fn plan(&self, selection: &Selection) -> Result<Vec<FetchPlan>, PackError> {
        let descriptors = self.catalog.resolve_selection(selection);
        if descriptors.is_empty() {
            return Err(PackError::EmptySelection);
        }
        let layout = Layout::script(&self.config.script_root);
        Ok(descriptors
            .into_iter()
            .map(|descriptor| plan_for(descriptor, &layout, &self.config.tool_program))
            .collect())
    }

    pub fn run(
        &self,
        request: &PackRequest,
        sink: &dyn ProgressSink,
    ) -> Result<OutputBundle, PackError> {
        let started = Instant::now();
        let mut state = PipelineState::Idle;

        transition(&mut state, PipelineState::Resolving, "resolving selection", sink);
        let descriptors = self.catalog.resolve_selection(&request.selection);
        if descriptors.is_empty() {
            transition(
                &mut state,
                PipelineState::RejectedEmptySelection,
                "no selection token matched the catalog",
                sink,
            );
            return Err(PackError::EmptySelection);
        }
        debug!(
            selected = descriptors.len(),
            requested = request.selection.tokens().len(),
            "selection resolved"
        );

        let workdir = tempfile::Builder::new()
            .prefix("things-dl")
            .tempdir()
            .map_err(|err| PackError::Packaging(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(workdir.path().to_path_buf())
            .map_err(|_| PackError::Packaging("non-utf8 working directory".to_string()))?;
        let manifest = Manifest::build(&self.catalog, &request.selection);
        let aggregator = Aggregator::new(self.config.bundle_name.clone());
        let total = descriptors.len();

        let bundle = match request.mode {
            PackMode::Execute => {
                let layout = Layout::scratch(&root);
                let request_deadline = started + self.config.total_timeout();
                let mut results = Vec::with_capacity(total);
                for (index, descriptor) in descriptors.into_iter().enumerate() {
                    transition(
                        &mut state,
                        PipelineState::Fetching { index, total },
                        &format!("{} ({})", descriptor.token(), descriptor.source_kind),
                        sink,
                    );
                    results.push(self.fetch_one(descriptor, &layout, request_deadline));
                }
                transition(&mut state, PipelineState::Aggregating, "packing archive", sink);
                aggregator.finish(
                    workdir,
                    layout.extracted().as_std_path(),
                    BundleContent::Fetched,
                    &manifest,
                    results,
                )?
            }
            PackMode::Record => {
                let layout = Layout::script(&self.config.script_root);
                let mut script = Script::new(&self.config.script_root);
                let mut results = Vec::with_capacity(total);
                for (index, descriptor) in descriptors.into_iter().enumerate() {
                    transition(
                        &mut state,
                        PipelineState::Fetching { index, total },
                        &format!("{} (recorded)", descriptor.token()),
                        sink,
                    );
                    let plan = plan_for(descriptor, &layout, &self.config.tool_program);
                    script = script.with_plan(&plan);
                    results.push(FetchResult {
                        descriptor: descriptor.clone(),
                        status: FetchStatus::Ok,
                        output_path: Some(plan.output_folder),
                    });
                }
                transition(&mut state, PipelineState::Aggregating, "packing script", sink);
                aggregator.finish(
                    workdir,
                    root.join("bundle").as_std_path(),
                    BundleContent::Script {
                        script: &script,
                        script_name: &self.config.script_name,
                    },
                    &manifest,
                    results,
                )?
            }
        };

        sink.event(ProgressEvent {
            state: PipelineState::Done,
            message: format!("phase=Done; {} bytes", bundle.size()),
            elapsed: Some(started.elapsed()),
        });
        info!(from = %state, to = %PipelineState::Done, "pipeline transition");
        Ok(bundle)
    }

    fn fetch_one(
        &self,
        descriptor: &DatasetDescriptor,
        layout: &Layout,
        request_deadline: Instant,
    ) -> FetchResult {
        let now = Instant::now();
        if now >= request_deadline {
            let err = PackError::Timeout("request time budget exhausted".to_string());
            warn!(url = %descriptor.source_url, error = %err, "skipping item");
            return failed(descriptor, &err);
        }
        let deadline = (now + self.config.item_timeout()).min(request_deadline);
        let plan = plan_for(descriptor, layout, &self.config.tool_program);

        match self.executor.run_plan(&plan, deadline) {
            Ok(()) => FetchResult {
                descriptor: descriptor.clone(),
                status: FetchStatus::Ok,
                output_path: Some(plan.output_folder),
            },
            Err(err) => {
                warn!(url = %descriptor.source_url, error = %err, "fetch failed");
                if let Err(cleanup) = fs_util::remove_path(plan.output_folder.as_std_path()) {
                    warn!(path = %plan.output_folder, error = %cleanup, "cleanup failed");
                }
                failed(descriptor, &err)
            }
        }
    }
}

fn failed(descriptor: &DatasetDescriptor, err: &PackError) -> FetchResult {
    FetchResult {
        descriptor: descriptor.clone(),
        status: FetchStatus::Failed {
            reason: err.to_string(),
        },
        output_path: None,
    }
}

fn transition(
    state: &mut PipelineState,
    next: PipelineState,
    detail: &str,
    sink: &dyn ProgressSink,
) {
    info!(from = %state, to = %next, "{detail}");
    *state = next;
    sink.event(ProgressEvent {
        state: next,
        message: format!("phase={next}; {detail}"),
        elapsed: None,
    });
}
