//! `quantlite image`: print the declared environment as a Dockerfile.

use anyhow::Result;
use quantlite_sandbox::ImageSpec;
use std::io::Write;

pub fn cmd_image(out: &mut dyn Write) -> Result<()> {
    write!(out, "{}", ImageSpec::default().render_dockerfile())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_image_prints_recipe() {
        let mut out = Vec::new();
        cmd_image(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("FROM "));
        for pkg in ["git", "build-essential", "cmake", "pkg-config"] {
            assert!(text.contains(pkg), "missing {pkg}");
        }
    }
}
