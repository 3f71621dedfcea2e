use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use futures::future::try_join_all;
use tokio::{
    fs,
    io::{AsyncBufReadExt, BufReader},
};

use crate::application::{collaborators::EntryModule, error::EngineError};

/// Tokens a module header needs at minimum: `module Name exposing (..)`.
const MIN_HEADER_TOKENS: usize = 4;

/// Source files with `extension` directly inside `views_dir`, sorted by path.
pub async fn discover_view_files(
    views_dir: &Path,
    extension: &str,
) -> Result<Vec<PathBuf>, EngineError> {
    let mut entries = fs::read_dir(views_dir)
        .await
        .map_err(|err| EngineError::io("read views directory", views_dir, err))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| EngineError::io("read views directory", views_dir, err))?
    {
        let path = entry.path();
        let matches_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == extension);
        if !matches_extension {
            continue;
        }
        let file_type = entry
            .file_type()
            .await
            .map_err(|err| EngineError::io("inspect view file", &path, err))?;
        if file_type.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Module name declared on the first line of `path`.
pub async fn extract_module_name(path: &Path) -> Result<String, EngineError> {
    let file = fs::File::open(path)
        .await
        .map_err(|err| EngineError::io("open view file", path, err))?;
    let first_line = BufReader::new(file)
        .lines()
        .next_line()
        .await
        .map_err(|err| EngineError::io("read view file", path, err))?
        .unwrap_or_default();

    parse_module_header(&first_line).ok_or_else(|| EngineError::ModuleNameExtraction {
        path: path.to_path_buf(),
    })
}

pub async fn extract_module_names(files: &[PathBuf]) -> Result<Vec<String>, EngineError> {
    try_join_all(files.iter().map(|path| extract_module_name(path))).await
}

fn parse_module_header(line: &str) -> Option<String> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    if matches!(tokens.first(), Some(&"port") | Some(&"effect")) {
        tokens.remove(0);
    }
    if tokens.len() < MIN_HEADER_TOKENS || tokens[0] != "module" {
        return None;
    }
    Some(tokens[1].to_string())
}

/// Pair each module with the short alias it also answers to.
///
/// A multipart name such as `UI.MultipartModule` gets the alias
/// `MultipartModule` unless another module already uses that name or the
/// same last segment.
pub fn entry_modules(names: &[String]) -> Vec<EntryModule> {
    let mut last_segments: HashMap<&str, usize> = HashMap::new();
    for name in names {
        *last_segments.entry(last_segment(name)).or_default() += 1;
    }

    names
        .iter()
        .map(|name| {
            let short = last_segment(name);
            let alias = (short != name
                && last_segments.get(short) == Some(&1)
                && !names.iter().any(|other| other == short))
            .then(|| short.to_string());
            EntryModule {
                name: name.clone(),
                alias,
            }
        })
        .collect()
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
