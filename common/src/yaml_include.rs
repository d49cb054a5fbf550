use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use yaml_rust2::{Yaml, YamlLoader};

/// Loads a YAML file, resolving `!include <relative path>` lines first.
///
/// Included documents are merged in order and the including file's own keys
/// override them, so an environment file can include `base.yaml` and only
/// restate what differs.
pub fn load_yaml_with_includes(path: &Path) -> Result<Yaml, Box<dyn Error>> {
    let res = process_includes_recursive(&path.to_path_buf())?;
    tracing::debug!(path = ?path, "Processed config includes");
    Ok(res)
}

fn process_includes_recursive(path: &PathBuf) -> Result<Yaml, Box<dyn Error>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
    let base_path = path.parent().unwrap_or(Path::new(""));

    let (includes, rest): (Vec<&str>, Vec<&str>) = contents
        .lines()
        .partition(|&line| line.trim().starts_with("!include"));

    let mut processed_includes = Vec::with_capacity(includes.len());
    for line in includes {
        let include_path = line.trim().trim_start_matches("!include").trim();
        let full_path = base_path.join(include_path);
        processed_includes.push(process_includes_recursive(&full_path)?);
    }

    let rest_yamls = YamlLoader::load_from_str(&rest.join("\n"))?;
    let merged_rest = rest_yamls
        .into_iter()
        .reduce(|acc: Yaml, doc: Yaml| merge_yaml(&acc, &doc))
        .unwrap_or(Yaml::Hash(Default::default()));

    match processed_includes
        .into_iter()
        .reduce(|acc: Yaml, include: Yaml| merge_yaml(&acc, &include))
    {
        Some(merged_includes) => Ok(merge_yaml(&merged_includes, &merged_rest)),
        None => Ok(merged_rest),
    }
}

fn merge_yaml(base: &Yaml, override_yaml: &Yaml) -> Yaml {
    match (base, override_yaml) {
        (Yaml::Hash(base_hash), Yaml::Hash(override_hash)) => {
            let mut result = base_hash.clone();
            for (key, value) in override_hash {
                match base_hash.get(key) {
                    Some(base_value) => {
                        result.insert(key.clone(), merge_yaml(base_value, value));
                    }
                    None => {
                        result.insert(key.clone(), value.clone());
                    }
                }
            }
            Yaml::Hash(result)
        }
        (_, override_value) => override_value.clone(),
    }
}
