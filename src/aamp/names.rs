//! Recovery of parameter names from CRC32 hashes.

use cached::proc_macro::cached;
use std::borrow::Cow;
use std::collections::HashMap;

const HASHED_NAMES: &str = include_str!("../../data/botw_hashed_names.txt");
const NUMBERED_NAMES: &str = include_str!("../../data/botw_numbered_names.txt");

#[cached]
fn botw_hashed_names() -> HashMap<u32, &'static str> {
    HASHED_NAMES
        .lines()
        .filter(|line| !line.is_empty())
        .map(|name| (crc32fast::hash(name.as_bytes()), name))
        .collect()
}

#[cached]
fn botw_numbered_names() -> Vec<&'static str> {
    NUMBERED_NAMES
        .lines()
        .filter(|line| !line.is_empty())
        .collect()
}

/// Expands a printf-style template with a single `%d`-family specifier.
fn format_numbered(template: &str, index: usize) -> Option<String> {
    let percent = template.find('%')?;
    let (prefix, spec) = template.split_at(percent);
    let spec = &spec[1..];
    if let Some(suffix) = spec.strip_prefix('d') {
        return Some(format!("{}{}{}", prefix, index, suffix));
    }
    if spec.starts_with('0') {
        let d_pos = spec.find('d')?;
        let width: usize = spec[..d_pos].parse().ok()?;
        return Some(format!(
            "{}{:0width$}{}",
            prefix,
            index,
            &spec[d_pos + 1..],
            width = width
        ));
    }
    None
}

/// A table of names used to recover original names in binary parameter
/// archives, which store only hashes.
pub struct NameTable<'a> {
    /// Hash to name map. The strings are only references.
    names: HashMap<u32, Cow<'a, str>>,
    /// Hash to name map for guessed names. The strings are owned.
    owned_names: HashMap<u32, String>,
    /// Names that contain a printf specifier for an index.
    numbered_names: Vec<Cow<'a, str>>,
}

impl<'a> NameTable<'a> {
    /// Creates a name table, optionally seeded with the known Breath of the
    /// Wild strings.
    pub fn new(with_botw_strings: bool) -> Self {
        let mut table = NameTable {
            names: HashMap::new(),
            owned_names: HashMap::new(),
            numbered_names: Vec::new(),
        };
        if with_botw_strings {
            table.names.extend(
                botw_hashed_names()
                    .into_iter()
                    .map(|(hash, name)| (hash, Cow::Borrowed(name))),
            );
            table.numbered_names.extend(
                botw_numbered_names().into_iter().map(Cow::Borrowed),
            );
        }
        table
    }

    /// Adds a known name.
    pub fn add_name(&mut self, name: String) {
        let hash = crc32fast::hash(name.as_bytes());
        self.add_name_with_hash(hash, name);
    }

    /// Adds a known name whose hash has already been computed.
    pub fn add_name_with_hash(&mut self, hash: u32, name: String) {
        self.owned_names.entry(hash).or_insert(name);
    }

    /// Adds a known name without copying the string data.
    pub fn add_name_reference(&mut self, name: &'a str) {
        self.names
            .entry(crc32fast::hash(name.as_bytes()))
            .or_insert(Cow::Borrowed(name));
    }

    /// Tries to find or guess the name associated with `hash`, given the
    /// entry's index in its parent and the parent's name hash. Successful
    /// index-based guesses are memoized.
    pub fn get_name(&mut self, hash: u32, index: usize, parent_hash: u32) -> Option<&str> {
        if self.names.contains_key(&hash) {
            return self.names.get(&hash).map(|name| name.as_ref());
        }
        if self.owned_names.contains_key(&hash) {
            return self.owned_names.get(&hash).map(String::as_str);
        }

        // Try to guess the name from the parent structure if possible.
        let guess = self
            .names
            .get(&parent_hash)
            .map(|name| name.to_string())
            .and_then(|parent| {
                if let Some(found) = guess_from_prefix(&parent, index, hash) {
                    return Some(found);
                }
                // Sometimes the parent is plural and the children singular.
                if let Some(found) = guess_from_prefix("Children", index, hash) {
                    return Some(found);
                }
                for suffix in ["s", "es", "List"] {
                    if let Some(stem) = parent.strip_suffix(suffix) {
                        if let Some(found) = guess_from_prefix(stem, index, hash) {
                            return Some(found);
                        }
                    }
                }
                None
            });
        if let Some(found) = guess {
            self.owned_names.insert(hash, found);
            return self.owned_names.get(&hash).map(String::as_str);
        }

        // Last resort: test all numbered names.
        let mut found = None;
        'outer: for template in &self.numbered_names {
            for i in 0..index + 2 {
                match format_numbered(template, i) {
                    Some(candidate) => {
                        if crc32fast::hash(candidate.as_bytes()) == hash {
                            found = Some(candidate);
                            break 'outer;
                        }
                    }
                    None => break,
                }
            }
        }
        if let Some(found) = found {
            self.owned_names.insert(hash, found);
            return self.owned_names.get(&hash).map(String::as_str);
        }
        None
    }
}

fn guess_from_prefix(prefix: &str, index: usize, hash: u32) -> Option<String> {
    for i in [index, index + 1] {
        let candidates = [
            format!("{}{}", prefix, i),
            format!("{}_{}", prefix, i),
            format!("{}{:02}", prefix, i),
            format!("{}_{:02}", prefix, i),
            format!("{}{:03}", prefix, i),
            format!("{}_{:03}", prefix, i),
        ];
        for candidate in candidates {
            if crc32fast::hash(candidate.as_bytes()) == hash {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc(s: &str) -> u32 {
        crc32fast::hash(s.as_bytes())
    }

    #[test]
    fn direct_lookup() {
        let mut table = NameTable::new(true);
        assert_eq!(table.get_name(crc("Bone"), 0, 0), Some("Bone"));
        assert_eq!(table.get_name(crc("Enabled"), 0, 0), Some("Enabled"));
    }

    #[test]
    fn guesses_numbered_sibling() {
        let mut table = NameTable::new(true);
        // "Bone" is a known name; Bone_03 is index 3 of its children.
        assert_eq!(
            table.get_name(crc("Bone_03"), 3, crc("Bone")),
            Some("Bone_03")
        );
        // The guess is memoized: a second lookup needs no parent context.
        assert_eq!(table.get_name(crc("Bone_03"), 0, 0), Some("Bone_03"));
    }

    #[test]
    fn guesses_singular_from_plural_parent() {
        let mut table = NameTable::new(false);
        // Parent names are looked up in the reference map.
        table.add_name_reference("Textures");
        assert_eq!(
            table.get_name(crc("Texture0"), 0, crc("Textures")),
            Some("Texture0")
        );
    }

    #[test]
    fn guesses_from_numbered_templates() {
        let mut table = NameTable::new(true);
        assert_eq!(table.get_name(crc("AI_0"), 0, 0), Some("AI_0"));
        assert_eq!(table.get_name(crc("AI_1"), 0, 0), Some("AI_1"));
    }

    #[test]
    fn unknown_hash_is_none() {
        let mut table = NameTable::new(true);
        assert_eq!(table.get_name(0x12345678, 0, 0), None);
    }

    #[test]
    fn name_references() {
        let mut table = NameTable::new(false);
        table.add_name_reference("CustomParam");
        assert_eq!(table.get_name(crc("CustomParam"), 0, 0), Some("CustomParam"));
    }

    #[test]
    fn numbered_formats() {
        assert_eq!(format_numbered("AI_%d", 7).as_deref(), Some("AI_7"));
        assert_eq!(format_numbered("Item_%03d", 7).as_deref(), Some("Item_007"));
        assert_eq!(format_numbered("Table_%02d", 0).as_deref(), Some("Table_00"));
        assert_eq!(format_numbered("NoSpecifier", 0), None);
    }
}
