use anyhow::{anyhow, Context, Result};
use clap::{
    app_from_crate, crate_authors, crate_description, crate_name, crate_version, AppSettings, Arg,
    ArgMatches, SubCommand,
};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::validators::*;
use terrasync_mirror::{Config, SceneryVersion, Stages, DEFAULT_IMAGERY_URL, DEFAULT_MIRRORS};

const TILE_CMD: &str = "tile";
const PLAN_CMD: &str = "plan";
const SCAN_CMD: &str = "scan";

const LAT_ARG: &str = "lat";
const LON_ARG: &str = "lon";
const RADIUS_ARG: &str = "radius";
const PLAN_FILE_ARG: &str = "plan_file";
const DEEP_ARG: &str = "deep";
const URL_ARG: &str = "url";
const OUTPUT_DIR_ARG: &str = "output_dir";
const SCENERY_ARG: &str = "scenery";
const RESOLUTION_ARG: &str = "resolution";
const IMAGERY_URL_ARG: &str = "imagery_url";
const IMAGERY_TOKEN_ARG: &str = "imagery_token";
const TIMEOUT_ARG: &str = "timeout";
const DRY_RUN_ARG: &str = "dry_run";
const REQUEST_RETRIES_ARG: &str = "num_retries";
const PARALLEL_FETCHES_ARG: &str = "num_parallel";
const FETCH_EXISTING_ARG: &str = "should_fetch_existing";
const NO_ORTHO_ARG: &str = "no_ortho";
const NO_OBJECTS_ARG: &str = "no_objects";
const NO_OVERLAYS_ARG: &str = "no_overlays";

#[derive(Clone, Debug)]
pub enum Command {
    Tile { lat: f64, lon: f64, radius: f64 },
    Plan { path: PathBuf, radius: f64 },
    Scan { deep: bool },
}

pub struct Args {
    pub command: Command,
    pub output_dir: PathBuf,
    pub mirrors: Vec<String>,
    pub version: SceneryVersion,
    pub resolution: u32,
    pub imagery_url: String,
    pub imagery_token: Option<String>,
    pub parallel_fetches: usize,
    pub retries: u8,
    pub timeout: Duration,
    pub fetch_existing: bool,
    pub dry_run: bool,
    pub stages: Stages,
}

impl std::convert::From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            save_root: args.output_dir,
            mirrors: args.mirrors,
            version: args.version,
            ortho_resolution: args.resolution,
            imagery_url: args.imagery_url,
            imagery_token: args.imagery_token,
            concurrency: args.parallel_fetches,
            timeout: args.timeout,
            request_retries: args.retries,
            fetch_existing: args.fetch_existing,
            stages: args.stages,
            ..Config::default()
        }
    }
}

impl Args {
    pub fn parse() -> Result<Self> {
        let matches = get_matches();

        let (command, sub) = match matches.subcommand() {
            (TILE_CMD, Some(sub)) => (
                Command::Tile {
                    lat: value(sub, LAT_ARG)?,
                    lon: value(sub, LON_ARG)?,
                    radius: value(sub, RADIUS_ARG)?,
                },
                sub,
            ),
            (PLAN_CMD, Some(sub)) => (
                Command::Plan {
                    path: value(sub, PLAN_FILE_ARG)?,
                    radius: value(sub, RADIUS_ARG)?,
                },
                sub,
            ),
            (SCAN_CMD, Some(sub)) => (
                Command::Scan {
                    deep: sub.is_present(DEEP_ARG),
                },
                sub,
            ),
            (name, _) => return Err(anyhow!("unknown command '{}'", name)),
        };

        let mirrors = match sub.values_of(URL_ARG) {
            Some(urls) => urls.map(str::to_owned).collect(),
            None => DEFAULT_MIRRORS.iter().map(|s| (*s).to_owned()).collect(),
        };

        Ok(Self {
            command,
            output_dir: value(sub, OUTPUT_DIR_ARG)?,
            mirrors,
            version: value(sub, SCENERY_ARG)?,
            resolution: value(sub, RESOLUTION_ARG)?,
            imagery_url: value(sub, IMAGERY_URL_ARG)?,
            imagery_token: sub.value_of(IMAGERY_TOKEN_ARG).map(str::to_owned),
            parallel_fetches: value(sub, PARALLEL_FETCHES_ARG)?,
            retries: value(sub, REQUEST_RETRIES_ARG)?,
            timeout: Duration::from_secs(value(sub, TIMEOUT_ARG)?),
            fetch_existing: sub.is_present(FETCH_EXISTING_ARG),
            dry_run: sub.is_present(DRY_RUN_ARG),
            stages: Stages {
                orthophoto: !sub.is_present(NO_ORTHO_ARG),
                objects: !sub.is_present(NO_OBJECTS_ARG),
                overlays: !sub.is_present(NO_OVERLAYS_ARG),
            },
        })
    }
}

/// Parses an argument that carries a default value or was validated.
fn value<T>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = matches
        .value_of(name)
        .ok_or_else(|| anyhow!("missing argument '{}'", name))?;
    raw.parse()
        .map_err(|e: T::Err| anyhow!("{}", e))
        .with_context(|| format!("invalid value '{}' for '{}'", raw, name))
}

fn radius_arg() -> Arg<'static, 'static> {
    Arg::with_name(RADIUS_ARG)
        .help("Also fetch every tile whose center lies within this many miles")
        .validator(is_radius)
        .default_value("0")
        .takes_value(true)
        .long("radius")
}

fn shared_args() -> Vec<Arg<'static, 'static>> {
    vec![
        Arg::with_name(OUTPUT_DIR_ARG)
            .help("The root folder of the local scenery mirror.")
            .default_value("scenery")
            .takes_value(true)
            .short("o")
            .long("output"),
        Arg::with_name(URL_ARG)
            .help("Base URL of a TerraSync mirror. Repeat to spread requests over several mirrors.")
            .validator(is_http_url)
            .takes_value(true)
            .multiple(true)
            .number_of_values(1)
            .short("u")
            .long("url"),
        Arg::with_name(SCENERY_ARG)
            .help("The scenery format to sync: ws2 or ws3")
            .validator(is_scenery_version)
            .default_value("ws2")
            .takes_value(true)
            .long("scenery"),
        Arg::with_name(RESOLUTION_ARG)
            .help("Edge length of the orthophoto textures in pixels")
            .validator(is_numeric_min(1))
            .default_value("2048")
            .takes_value(true)
            .long("resolution"),
        Arg::with_name(IMAGERY_URL_ARG)
            .help("Imagery export URL with the format specifiers `{xmin}`, `{ymin}`, `{xmax}`, `{ymax}` (Web-Mercator meters), `{width}` and `{height}`.")
            .validator(is_http_url)
            .default_value(DEFAULT_IMAGERY_URL)
            .takes_value(true)
            .long("imagery-url"),
        Arg::with_name(IMAGERY_TOKEN_ARG)
            .help("API token appended to imagery requests")
            .takes_value(true)
            .long("imagery-token"),
        Arg::with_name(PARALLEL_FETCHES_ARG)
            .help("The amount of tiles and requests processed in parallel.")
            .validator(is_numeric_min(1))
            .default_value("50")
            .takes_value(true)
            .short("r")
            .long("rate"),
        Arg::with_name(REQUEST_RETRIES_ARG)
            .help("The amount of times to retry a failed HTTP request.")
            .validator(is_u8)
            .default_value("3")
            .takes_value(true)
            .long("retries"),
        Arg::with_name(TIMEOUT_ARG)
            .help("The timeout (in seconds) for a single request. Pass 0 for no timeout.")
            .validator(is_numeric_min(0))
            .default_value("600")
            .takes_value(true)
            .short("t")
            .long("timeout"),
        Arg::with_name(FETCH_EXISTING_ARG)
            .help("Fetch files even if the local copy is current (this usually isn't required)")
            .takes_value(false)
            .long("fetch-existing"),
        Arg::with_name(NO_ORTHO_ARG)
            .help("Skip the orthophoto textures")
            .takes_value(false)
            .long("no-ortho"),
        Arg::with_name(NO_OBJECTS_ARG)
            .help("Skip the objects placed on the tiles")
            .takes_value(false)
            .long("no-objects"),
        Arg::with_name(NO_OVERLAYS_ARG)
            .help("Skip the osm2city overlays")
            .takes_value(false)
            .long("no-overlays"),
        Arg::with_name(DRY_RUN_ARG)
            .help("Don't actually fetch anything, just determine how many tiles would be fetched.")
            .takes_value(false)
            .long("dry-run"),
    ]
}

fn get_matches() -> ArgMatches<'static> {
    app_from_crate!()
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::VersionlessSubcommands)
        .subcommand(
            SubCommand::with_name(TILE_CMD)
                .about("Sync the tile containing a point, or every tile around it")
                .arg(
                    Arg::with_name(LAT_ARG)
                        .help("Latitude of the point (in degrees)")
                        .validator(is_latitude)
                        .required(true)
                        .takes_value(true)
                        .allow_hyphen_values(true)
                        .long("lat"),
                )
                .arg(
                    Arg::with_name(LON_ARG)
                        .help("Longitude of the point (in degrees)")
                        .validator(is_longitude)
                        .required(true)
                        .takes_value(true)
                        .allow_hyphen_values(true)
                        .long("lon"),
                )
                .arg(radius_arg())
                .args(&shared_args()),
        )
        .subcommand(
            SubCommand::with_name(PLAN_CMD)
                .about("Sync every tile along a FlightGear flight plan (.fgfp)")
                .arg(
                    Arg::with_name(PLAN_FILE_ARG)
                        .help("The flight plan to follow")
                        .required(true)
                        .index(1),
                )
                .arg(radius_arg().default_value("10"))
                .args(&shared_args()),
        )
        .subcommand(
            SubCommand::with_name(SCAN_CMD)
                .about("List the local mirror and whether each file is still current")
                .arg(
                    Arg::with_name(DEEP_ARG)
                        .help("Include terrain meshes and check the resources each manifest references")
                        .takes_value(false)
                        .long("deep"),
                )
                .args(&shared_args()),
        )
        .get_matches()
}
