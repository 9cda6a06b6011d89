// ============================================================================
// Type Names
// ============================================================================
//
// Events, commands and entity states are looked up by name at runtime.
// `Named` gives every such type a stable name of the form
// `<module>:<kebab-type>`, e.g. `counter:incremented`, derived from the Rust
// type path unless the type overrides it.
//
// ============================================================================

pub trait Named {
    fn type_name() -> String
    where
        Self: Sized,
    {
        name_of::<Self>()
    }
}

/// `<parent-module>:<kebab-case-type>` for any type
pub fn name_of<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let path = full.split('<').next().unwrap_or(full);

    let mut segments = path.rsplit("::");
    let type_segment = segments.next().unwrap_or(path);
    let namespace = segments.next().unwrap_or(type_segment);

    format!("{}:{}", to_kebab(namespace), to_kebab(type_segment))
}

fn to_kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;

    for c in name.chars() {
        if c == '_' {
            out.push('-');
            previous_lower = false;
        } else if c.is_uppercase() {
            if previous_lower {
                out.push('-');
            }
            out.extend(c.to_lowercase());
            previous_lower = false;
        } else {
            out.push(c);
            previous_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }

    out
}
