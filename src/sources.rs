use crate::domain::{DatasetDescriptor, SourceKind};
use crate::ops::{FetchOperation, FetchPlan, FetchTarget, Layout};

/// Builds the operation sequence for one descriptor. No I/O happens here.
pub trait SourceFetcher {
    fn plan(&self, descriptor: &DatasetDescriptor, layout: &Layout) -> FetchPlan;
}

/// Archive whose single top-level directory is renamed to the output folder.
pub struct ArchiveSource;

/// Single file named after `Content-Disposition`; nested archives are flattened.
pub struct DirectFileSource;

/// Delegates retrieval to an external dataset tool.
pub struct ExternalToolSource {
    pub program: String,
}

impl SourceFetcher for ArchiveSource {
    fn plan(&self, descriptor: &DatasetDescriptor, layout: &Layout) -> FetchPlan {
        let folder = &descriptor.output_folder_name;
        let archive = layout.downloads().join(format!("{folder}.zip"));
        let operations = vec![
            FetchOperation::CreateDir {
                path: layout.downloads().to_path_buf(),
            },
            FetchOperation::CreateDir {
                path: layout.extracted().to_path_buf(),
            },
            FetchOperation::FetchUrl {
                url: descriptor.source_url.clone(),
                target: FetchTarget::File(archive.clone()),
            },
            FetchOperation::ExtractArchive {
                archive,
                into: layout.extracted().to_path_buf(),
                rename_to: folder.clone(),
            },
        ];
        build_plan(descriptor, layout, operations)
    }
}

impl SourceFetcher for DirectFileSource {
    fn plan(&self, descriptor: &DatasetDescriptor, layout: &Layout) -> FetchPlan {
        let dest = layout.output_folder(&descriptor.output_folder_name);
        let operations = vec![
            FetchOperation::CreateDir { path: dest.clone() },
            FetchOperation::FetchUrl {
                url: descriptor.source_url.clone(),
                target: FetchTarget::Directory(dest.clone()),
            },
            FetchOperation::FlattenNested { dir: dest },
        ];
        build_plan(descriptor, layout, operations)
    }
}

impl SourceFetcher for ExternalToolSource {
    fn plan(&self, descriptor: &DatasetDescriptor, layout: &Layout) -> FetchPlan {
        let dest = layout.output_folder(&descriptor.output_folder_name);
        let mut args = vec![
            "download".to_string(),
            format!("--dataset={}", dataset_id(&descriptor.source_url)),
            format!("--target-dir={dest}"),
        ];
        args.extend(descriptor.filters.tool_arg());

        let operations = vec![
            FetchOperation::CreateDir { path: dest.clone() },
            FetchOperation::InvokeExternal {
                program: self.program.clone(),
                args,
                dest,
            },
        ];
        build_plan(descriptor, layout, operations)
    }
}

/// Picks the strategy for the descriptor's resolved kind.
pub fn plan_for(descriptor: &DatasetDescriptor, layout: &Layout, tool_program: &str) -> FetchPlan {
    match descriptor.source_kind {
        SourceKind::Archive => ArchiveSource.plan(descriptor, layout),
        SourceKind::DirectFile => DirectFileSource.plan(descriptor, layout),
        SourceKind::ExternalTool => ExternalToolSource {
            program: tool_program.to_string(),
        }
        .plan(descriptor, layout),
    }
}

/// Last non-empty path segment of the URL, without query or fragment.
pub fn dataset_id(url: &str) -> &str {
    last_path_segment(url).unwrap_or(url)
}

pub fn last_path_segment(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = url[..end].trim_end_matches('/');
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let (_, tail) = path.rsplit_once('/')?;
    (!tail.is_empty()).then_some(tail)
}

fn build_plan(
    descriptor: &DatasetDescriptor,
    layout: &Layout,
    operations: Vec<FetchOperation>,
) -> FetchPlan {
    FetchPlan {
        token: descriptor.token(),
        source_url: descriptor.source_url.clone(),
        output_folder: layout.output_folder(&descriptor.output_folder_name),
        operations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_segment_of_urls() {
        assert_eq!(
            last_path_segment("https://openneuro.org/datasets/ds004212/"),
            Some("ds004212")
        );
        assert_eq!(last_path_segment("https://osf.io/download/abc12?x=1"), Some("abc12"));
        assert_eq!(last_path_segment("https://osf.io"), None);
        assert_eq!(dataset_id("ds000001"), "ds000001");
    }
}
