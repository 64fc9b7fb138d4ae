// Golden categories
//
// A GraphChallenge truth file lists, one per line, the 1-based ids of the
// inputs whose final activation row is not all zero. An inference run
// matches it when exactly those inputs received a class.

use std::path::Path;

use sparrow_core::{Error, Result, NO_MATCH};

/// Truth file name for an `neurons`-wide, `layers`-deep network.
pub fn categories_file_name(neurons: usize, layers: usize) -> String {
    format!("neuron{neurons}-l{layers}-categories.tsv")
}

/// Parse 1-based category ids into sorted 0-based row ids.
pub fn parse_categories(text: &str) -> Result<Vec<u32>> {
    let mut rows = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| match line.trim().parse::<u32>() {
            Ok(id) if id >= 1 => Ok(id - 1),
            _ => Err(Error::format(
                "categories",
                format!("line {}: '{}' is not a 1-based row id", i + 1, line.trim()),
            )),
        })
        .collect::<Result<Vec<u32>>>()?;
    rows.sort_unstable();
    rows.dedup();
    Ok(rows)
}

pub fn read_categories(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_categories(&text)
}

/// Row ids that received a class, ascending.
pub fn categories_from_classes(classes: &[i32]) -> Vec<u32> {
    classes
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c != NO_MATCH)
        .map(|(i, _)| i as u32)
        .collect()
}

/// Render row ids as a 1-based truth file.
pub fn encode_categories(rows: &[u32]) -> String {
    rows.iter().map(|r| format!("{}\n", r + 1)).collect()
}

/// Whether exactly the rows in `categories` received a class.
pub fn matches_categories(classes: &[i32], categories: &[u32]) -> bool {
    categories_from_classes(classes) == categories
}
