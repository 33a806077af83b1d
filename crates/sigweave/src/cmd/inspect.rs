use sigweave::replay::{resolve_paths, ReplayHeader};

use crate::cmd::InspectArgs;
use crate::exit::{replay_error, CliResult, SUCCESS};
use crate::output::{print_header, HeaderOutput, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let (header_path, data_path) = resolve_paths(&args.path);
    let header =
        ReplayHeader::read(&header_path).map_err(|err| replay_error("inspect failed", err))?;

    let samples = header.total_samples();
    let out = HeaderOutput {
        header: header_path.display().to_string(),
        data: data_path.display().to_string(),
        sample_rate: header.format.sample_rate,
        dim: header.format.dim,
        bytes_per_value: header.format.bytes_per_value,
        sample_type: header.format.sample_type.name(),
        chunks: header.chunks.len(),
        samples,
        start_seconds: header.start_us() as f64 / 1_000_000.0,
        duration_seconds: samples as f64 / header.format.sample_rate,
    };
    print_header(&out, format);
    Ok(SUCCESS)
}
