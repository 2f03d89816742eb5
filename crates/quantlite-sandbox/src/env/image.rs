//! Declared environment image: base distribution plus a fixed package set.

/// A system package and the executables it is expected to put on `PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AptPackage {
    pub name: &'static str,
    pub provides: &'static [&'static str],
}

/// Version control, compiler toolchain, build system, package-config tool.
pub const LLAMA_BUILD_PACKAGES: &[AptPackage] = &[
    AptPackage {
        name: "git",
        provides: &["git"],
    },
    AptPackage {
        name: "build-essential",
        provides: &["make", "cc", "c++"],
    },
    AptPackage {
        name: "cmake",
        provides: &["cmake"],
    },
    AptPackage {
        name: "pkg-config",
        provides: &["pkg-config"],
    },
];

pub const DEFAULT_BASE_IMAGE: &str = "debian:bookworm-slim";

/// The environment the job runs in. Same value on every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub base: &'static str,
    pub packages: &'static [AptPackage],
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self::llama_build()
    }
}

impl ImageSpec {
    /// debian-slim with what a llama.cpp `make` build needs.
    pub fn llama_build() -> Self {
        Self {
            base: DEFAULT_BASE_IMAGE,
            packages: LLAMA_BUILD_PACKAGES,
        }
    }

    pub fn package_names(&self) -> Vec<&'static str> {
        self.packages.iter().map(|p| p.name).collect()
    }

    /// Render as a Dockerfile so the environment can be rebuilt elsewhere.
    pub fn render_dockerfile(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("FROM {}\n", self.base));
        out.push_str("RUN apt-get update \\\n");
        out.push_str(" && DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends \\\n");
        for name in self.package_names() {
            out.push_str(&format!("      {} \\\n", name));
        }
        out.push_str(" && rm -rf /var/lib/apt/lists/*\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_packages() {
        assert_eq!(
            ImageSpec::llama_build().package_names(),
            vec!["git", "build-essential", "cmake", "pkg-config"]
        );
    }

    #[test]
    fn test_dockerfile_is_stable() {
        let a = ImageSpec::default().render_dockerfile();
        let b = ImageSpec::default().render_dockerfile();
        assert_eq!(a, b);
        assert!(a.starts_with("FROM debian:bookworm-slim\n"));
        assert!(a.contains("      build-essential \\\n"));
        assert!(a.contains("      pkg-config \\\n"));
    }
}
