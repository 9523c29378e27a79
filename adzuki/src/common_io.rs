use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
///
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
///
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", output_file, e))?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Write every line into the output file
///
/// * `lines` - anything printable, one item per line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

///
/// Read every non-empty line and split it on tabs
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_tab_separated(input_file: &str) -> anyhow::Result<Vec<Vec<Box<str>>>> {
    let buf = open_buf_reader(input_file)?;
    let mut lines = vec![];
    for line in buf.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines.push(
            line.split('\t')
                .map(|w| w.trim().to_owned().into_boxed_str())
                .collect(),
        );
    }
    Ok(lines)
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir_parent(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gz_lines_survive_a_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("lines.txt.gz");
        let file = file.to_str().unwrap();

        let lines = vec!["0.1\t0.9", "0.25\t0.75"];
        write_lines(&lines, file)?;

        let words = read_tab_separated(file)?;
        assert_eq!(words.len(), 2);
        assert_eq!(words[1][0].as_ref(), "0.25");
        assert_eq!(words[1][1].as_ref(), "0.75");
        Ok(())
    }
}
