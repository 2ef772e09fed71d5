use std::path::Path;

use anyhow::Context;
use cilsplice::prelude::*;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let image = ModuleImage::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let summary = image.summary();

    println!("Module:        {}", image.name);
    println!("Version:       {}", image.version);
    println!("Types:         {}", summary.types);
    println!("Methods:       {}", summary.methods);
    println!("Fields:        {}", summary.fields);
    println!("Type refs:     {}", summary.type_refs);
    println!("Member refs:   {}", summary.member_refs);
    println!("User strings:  {}", summary.user_strings);

    if !image.assembly_refs.is_empty() {
        println!("Dependencies:");
        for dep in &image.assembly_refs {
            let version = if dep.version == Version::ANY {
                "any".to_string()
            } else {
                dep.version.to_string()
            };
            println!("  {} ({})", dep.name, version);
        }
    }

    Ok(())
}
