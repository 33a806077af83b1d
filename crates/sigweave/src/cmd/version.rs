use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("sigweave {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: sigweave");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol_version: {}", sigweave::frame::PROTOCOL_VERSION);
    println!(
        "build_target: {}",
        option_env!("SIGWEAVE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: link={}, replay={}, cli=true",
        cfg!(feature = "link"),
        cfg!(feature = "replay")
    );

    Ok(SUCCESS)
}
