/// Command-line parsing tests

use super::*;

fn parse(args: &[&str]) -> Result<Options, clap::Error> {
    let argv = std::iter::once("pico_demo").chain(args.iter().copied());
    cli().try_get_matches_from(argv).map(|matches| options_from(&matches))
}

#[test]
fn test_defaults() {
    let options = parse(&[]).unwrap();
    assert_eq!(options.backend, BackendKind::Immediate);
    assert_eq!(options.frames, 120);
    assert!(options.vsync);
    assert!(!options.threaded_gpu);
    assert!(!options.headless);
    assert_eq!(options.validation, cfg!(debug_assertions));
}

#[test]
fn test_every_option() {
    let options = parse(&[
        "--backend",
        "dx12",
        "--frames",
        "3",
        "--no-vsync",
        "--threaded-gpu",
        "--validation",
        "--headless",
    ])
    .unwrap();
    assert_eq!(
        options,
        Options {
            backend: BackendKind::Explicit,
            frames: 3,
            vsync: false,
            threaded_gpu: true,
            validation: true,
            headless: true,
        }
    );
}

#[test]
fn test_backend_accepts_its_aliases() {
    assert_eq!(parse(&["--backend", "Explicit"]).unwrap().backend, BackendKind::Explicit);
    assert_eq!(parse(&["--backend", "v1"]).unwrap().backend, BackendKind::Immediate);
}

#[test]
fn test_invalid_values_are_rejected() {
    let unknown_backend = parse(&["--backend", "vulkan"]).unwrap_err();
    assert_eq!(unknown_backend.kind(), clap::error::ErrorKind::ValueValidation);
    assert!(unknown_backend.to_string().contains("unknown backend 'vulkan'"));

    assert_eq!(parse(&["--frames", "many"]).unwrap_err().kind(), clap::error::ErrorKind::ValueValidation);
    assert_eq!(parse(&["--frames"]).unwrap_err().kind(), clap::error::ErrorKind::InvalidValue);
    assert_eq!(parse(&["--fast"]).unwrap_err().kind(), clap::error::ErrorKind::UnknownArgument);
}

#[test]
fn test_headless_run_draws_every_frame() {
    let options = Options { frames: 4, headless: true, ..parse(&["--backend", "dx12"]).unwrap() };
    assert_eq!(run(&options).unwrap(), 4);
}
