use std::fs;

use assert_matches::assert_matches;
use things_dataloader::catalog::Catalog;
use things_dataloader::domain::{Filters, Selection, SelectionToken, SourceKind, default_source_markers};
use things_dataloader::error::PackError;

const DATASETS: &str = "\
name,sub-dataset name,description,files,download_url,size,include_files,exclude_files,code,source_kind
THINGS-images,Main images,All object images,images.zip,https://figshare.com/ndownloader/files/1,4.7 GB,,,,
THINGS-fMRI,Betas,Single-trial responses,betas_sub-01.h5; betas_sub-02.h5,https://osf.io/download/b3tas,12 GB,,,,
THINGS-MEG,Raw,MEG recordings,sub-BIGMEG1,https://openneuro.org/datasets/ds004212/,80 GB,sub-BIGMEG1; sub-BIGMEG2,,,
THINGS-images,Metadata,Concept metadata,metadata.tsv,https://example.org/meta.tsv,1 MB,,,\"doi:10.1371/x, v2\",file
";

const DESCRIPTIONS: &str = "\
name,name_description
THINGS-images,Naturalistic object images
";

fn write_catalog(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let datasets = dir.join("datasets.csv");
    let descriptions = dir.join("dataset_descriptions.csv");
    fs::write(&datasets, DATASETS).unwrap();
    fs::write(&descriptions, DESCRIPTIONS).unwrap();
    (datasets, descriptions)
}

#[test]
fn load_groups_rows_by_catalog_name() {
    let dir = tempfile::tempdir().unwrap();
    let (datasets, descriptions) = write_catalog(dir.path());

    let catalog = Catalog::load(&datasets, Some(&descriptions), &default_source_markers()).unwrap();

    assert_eq!(catalog.len(), 4);
    let names = catalog
        .groups()
        .iter()
        .map(|group| group.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["THINGS-images", "THINGS-fMRI", "THINGS-MEG"]);
    assert_eq!(catalog.groups()[0].sub_datasets.len(), 2);
    assert_eq!(catalog.describe("THINGS-images"), Some("Naturalistic object images"));
    assert_eq!(catalog.describe("THINGS-MEG"), None);
}

#[test]
fn resolve_builds_full_descriptors() {
    let dir = tempfile::tempdir().unwrap();
    let (datasets, _) = write_catalog(dir.path());
    let catalog = Catalog::load(&datasets, None, &default_source_markers()).unwrap();

    let betas = catalog
        .resolve(&SelectionToken::from("THINGS-fMRI_Betas"))
        .unwrap();
    assert_eq!(betas.source_kind, SourceKind::DirectFile);
    assert_eq!(betas.output_folder_name, "THINGS-fMRI_Betas");
    assert_eq!(betas.files, vec!["betas_sub-01.h5", "betas_sub-02.h5"]);
    assert_eq!(betas.filters, Filters::None);

    let meg = catalog.resolve(&SelectionToken::from("THINGS-MEG_Raw")).unwrap();
    assert_eq!(meg.source_kind, SourceKind::ExternalTool);
    assert_eq!(
        meg.filters,
        Filters::Include(vec!["sub-BIGMEG1".to_string(), "sub-BIGMEG2".to_string()])
    );

    // explicit kind column beats URL markers
    let meta = catalog
        .resolve(&SelectionToken::from("THINGS-images_Metadata"))
        .unwrap();
    assert_eq!(meta.source_kind, SourceKind::DirectFile);
    assert_eq!(meta.code, "doi:10.1371/x, v2");

    let main = catalog
        .resolve(&SelectionToken::from("THINGS-images_Main images"))
        .unwrap();
    assert_eq!(main.output_folder_name, "THINGS-images_Main_images");
}

#[test]
fn resolve_selection_keeps_order_and_skips_unknown() {
    let catalog = Catalog::from_reader(DATASETS.as_bytes(), &default_source_markers()).unwrap();
    let selection = Selection::new(["THINGS-MEG_Raw", "nope", "THINGS-fMRI_Betas"]);

    let resolved = catalog
        .resolve_selection(&selection)
        .into_iter()
        .map(|descriptor| descriptor.token())
        .collect::<Vec<_>>();
    assert_eq!(
        resolved,
        vec![
            SelectionToken::from("THINGS-MEG_Raw"),
            SelectionToken::from("THINGS-fMRI_Betas"),
        ]
    );
}

#[test]
fn invalid_catalogs_are_rejected() {
    let duplicate = "\
name,sub-dataset name,description,files,download_url,size
A,one,x,f,https://osf.io/download/1,1 KB
A,one,y,g,https://osf.io/download/2,1 KB
";
    assert_matches!(
        Catalog::from_reader(duplicate.as_bytes(), &default_source_markers()),
        Err(PackError::CatalogParse(message)) if message.contains("duplicate")
    );

    let unknown_host = "\
name,sub-dataset name,description,files,download_url,size
A,one,x,f,https://example.org/data.bin,1 KB
";
    assert_matches!(
        Catalog::from_reader(unknown_host.as_bytes(), &default_source_markers()),
        Err(PackError::CatalogParse(_))
    );

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.csv");
    assert_matches!(
        Catalog::load(&missing, None, &default_source_markers()),
        Err(PackError::CatalogRead(path)) if path == missing
    );
}
