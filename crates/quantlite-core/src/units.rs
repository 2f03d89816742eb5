//! Byte counts as the fractional gigabytes printed in the size summary.

use serde::Serialize;

const BYTES_PER_GB: f64 = (1024u64 * 1024 * 1024) as f64;

/// Bytes → GB (1024³), as printed in reports.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Input/output sizes of a finished quantize run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub original_bytes: u64,
    pub quantized_bytes: u64,
}

impl SizeReport {
    pub fn new(original_bytes: u64, quantized_bytes: u64) -> Self {
        Self {
            original_bytes,
            quantized_bytes,
        }
    }

    pub fn original_gb(&self) -> f64 {
        bytes_to_gb(self.original_bytes)
    }

    pub fn quantized_gb(&self) -> f64 {
        bytes_to_gb(self.quantized_bytes)
    }

    /// Difference, not ratio. Negative if the output grew.
    pub fn saved_gb(&self) -> f64 {
        self.original_gb() - self.quantized_gb()
    }

    /// Three-line human summary.
    pub fn render(&self) -> String {
        format!(
            "   Original Size:  {:.2} GB\n   Quantized Size: {:.2} GB\n   Space Saved:    {:.2} GB",
            self.original_gb(),
            self.quantized_gb(),
            self.saved_gb()
        )
    }
}
