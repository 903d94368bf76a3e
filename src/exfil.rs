//! Writing products to disk: integrated spectra, raw spectrum dumps, and the atomic
//! file replacement the calibration record relies on.

use std::{
    fmt,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::info;

use crate::{
    calibration::velocity_axis, f_engine::Spectrum, integration::IntegrationProduct,
};

/// Replace `path` with `bytes` so that readers see either the old or the new contents
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// Filename-safe UTC timestamp
fn file_timestamp(time: &DateTime<Utc>) -> String {
    format!(
        "{}{:02}{:02}T{:02}{:02}{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(format!("unknown export format `{s}` (expected json or csv)")),
        }
    }
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> crate::Result<Vec<u8>> {
    writer.into_inner().map_err(|e| crate::Error::Io(e.into_error()))
}

/// Product CSV: metadata as `#` comment lines, then one row per bin
fn product_csv(product: &IntegrationProduct) -> crate::Result<Vec<u8>> {
    let mut head = Vec::new();
    if let serde_json::Value::Object(fields) = serde_json::to_value(&product.metadata)? {
        for (key, value) in fields {
            writeln!(head, "# {key}: {value}")?;
        }
    }
    let mut writer = csv::WriterBuilder::new().from_writer(head);
    writer.write_record(["velocity_km_s", "power_db"])?;
    for (v, p) in product.velocity_axis.iter().zip(&product.power_db) {
        writer.write_record([v.to_string(), p.to_string()])?;
    }
    finish_csv(writer)
}

fn spectrum_csv(spectrum: &Spectrum) -> crate::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(["frequency_mhz", "velocity_km_s", "power_db"])?;
    let velocity = velocity_axis(&spectrum.frequencies);
    for ((f, v), p) in spectrum.frequencies.iter().zip(&velocity).zip(&spectrum.power_db) {
        writer.write_record([f.to_string(), v.to_string(), p.to_string()])?;
    }
    finish_csv(writer)
}

/// Writes products into a directory, naming files by their UTC time
#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
    format: ExportFormat,
}

impl Exporter {
    pub fn new(dir: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    fn path_for(&self, prefix: &str, ext: &str) -> PathBuf {
        self.dir
            .join(format!("{prefix}-{}.{ext}", file_timestamp(&Utc::now())))
    }

    /// Save an integrated spectrum, returning where it went
    pub fn save(&self, product: &IntegrationProduct) -> crate::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(
            &format!("hi-n{}", product.metadata.integration_count),
            self.format.extension(),
        );
        let bytes = match self.format {
            ExportFormat::Json => serde_json::to_vec_pretty(product)?,
            ExportFormat::Csv => product_csv(product)?,
        };
        write_atomic(&path, &bytes)?;
        info!(
            count = product.metadata.integration_count,
            "Saved integration to {}",
            path.display()
        );
        Ok(path)
    }

    /// Dump a single live spectrum as CSV, whatever the product format
    pub fn save_spectrum(&self, spectrum: &Spectrum) -> crate::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for("spectrum", "csv");
        write_atomic(&path, &spectrum_csv(spectrum)?)?;
        info!("Saved spectrum to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::IntegrationMetadata;
    use crate::window::WindowKind;
    use chrono::TimeZone;

    fn product() -> IntegrationProduct {
        IntegrationProduct {
            velocity_axis: vec![-1.5, 0.0, 1.5],
            power_db: vec![-80.0, -70.5, -80.0],
            metadata: IntegrationMetadata {
                integration_count: 3,
                target_count: 3,
                center_freq_mhz: 1420.40575177,
                sample_rate_mhz: 6.0,
                fft_size: 3,
                window_type: WindowKind::Hann,
                timestamp: "2024-03-01T12:00:00Z".to_owned(),
                start_mjd: 60370.5,
                elapsed_s: 1.5,
                gain_reduction_db: 55,
                lna_state: 5,
            },
        }
    }

    #[test]
    fn test_file_timestamp() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 4, 5, 6).unwrap();
        assert_eq!(file_timestamp(&t), "20240301T040506");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert_eq!("csv".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert!("fits".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        // No temp file left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_save_json() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path().join("data"), ExportFormat::Json);
        let path = exporter.save(&product()).unwrap();
        assert!(path.starts_with(dir.path().join("data")));
        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["metadata"]["integration_count"], 3);
        assert_eq!(value["metadata"]["window_type"], "hann");
        assert_eq!(value["power_db"][1], -70.5);
    }

    #[test]
    fn test_save_csv() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path(), ExportFormat::Csv);
        let path = exporter.save(&product()).unwrap();
        assert_eq!(path.extension().unwrap(), "csv");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("# integration_count: 3\n"));
        assert!(text.contains("velocity_km_s,power_db\n"));
        assert!(text.ends_with("1.5,-80\n"));
        let rows = text.lines().filter(|l| !l.starts_with('#')).count();
        assert_eq!(rows, 4);
    }

    #[test]
    fn test_csv_body_reads_back() {
        let bytes = product_csv(&product()).unwrap();
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .from_reader(bytes.as_slice());
        assert_eq!(
            reader.headers().unwrap(),
            &csv::StringRecord::from(vec!["velocity_km_s", "power_db"])
        );
        let rows: Vec<(f64, f64)> = reader
            .records()
            .map(|r| {
                let r = r.unwrap();
                (r[0].parse().unwrap(), r[1].parse().unwrap())
            })
            .collect();
        assert_eq!(rows, [(-1.5, -80.0), (0.0, -70.5), (1.5, -80.0)]);
    }

    #[test]
    fn test_save_spectrum() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path(), ExportFormat::Json);
        let spectrum = Spectrum {
            frequencies: vec![crate::HI_REST_FREQ_MHZ, crate::HI_REST_FREQ_MHZ + 0.001],
            power_db: vec![-10.0, -20.0],
        };
        let path = exporter.save_spectrum(&spectrum).unwrap();
        let text = fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("frequency_mhz,velocity_km_s,power_db"));
        assert!(lines.next().unwrap().ends_with(",0,-10"));
        assert_eq!(lines.count(), 1);
    }
}
