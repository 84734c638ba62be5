use crate::CLAP_STYLING;
use clap::{arg, command};

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("orbit")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("orbit")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress progress output").required(false))
        .arg(
            arg!(-v --"verbose" "Log per-account detail (same as RUST_LOG=debug)")
                .required(false),
        )
        .arg(
            arg!(-c --"config-dir" <DIR>)
                .required(false)
                .help("Directory holding orbit.toml and orbit.db (default: ~/.config/orbit)")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Creates the orbit config directory, default config and database")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location of the config directory")
                        .default_value("~/.config/orbit/"),
                )
                .arg(
                    arg!(-f - -"force")
                        .help("Overwrite any existing config and database at the location")
                        .required(false),
                ),
        )
        .subcommand(
            command!("build")
                .about("Crawl the neighbourhood of an account and store it as a graph")
                .arg(
                    arg!(-u --"username" <USERNAME>)
                        .required(true)
                        .help("Seed account, with or without the leading @"),
                )
                .arg(
                    arg!(-d --"depth" <DEPTH>)
                        .required(false)
                        .help("How many hops away from the seed to crawl")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("2"),
                )
                .arg(
                    arg!(-n --"max-nodes" <COUNT>)
                        .required(false)
                        .help("Stop adding accounts once the graph holds this many")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("100"),
                )
                .arg(
                    arg!(-e --"edges" <DIRECTIONS>)
                        .required(false)
                        .help("Listings to crawl: followers, following or both")
                        .default_value("both"),
                )
                .arg(
                    arg!(-t --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("Concurrent account fetches (overrides [crawl] workers)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-r --"rate" <PER_SECOND>)
                        .required(false)
                        .help("Scraper calls per second (overrides [crawl] rate_per_second)")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Stop the crawl after this many seconds and keep what was fetched")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-s --"slug" <SLUG>)
                        .required(false)
                        .help("Graph id to use instead of a generated one"),
                )
                .arg(
                    arg!(--"fixture" <PATH>)
                        .required(false)
                        .help("Crawl a JSON fixture file instead of a live service")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("api-url"),
                )
                .arg(
                    arg!(--"api-url" <URL>)
                        .required(false)
                        .help("Base URL of the profile-lookup service (overrides [scraper] api_url)")
                        .conflicts_with("fixture"),
                ),
        )
        .subcommand(
            command!("list")
                .about("List stored graphs, newest first")
                .arg(arg!(--"json" "Print JSON instead of a table").required(false)),
        )
        .subcommand(
            command!("show")
                .about("Show a stored graph")
                .arg(arg!(<ID> "Graph id"))
                .arg(arg!(--"json" "Print the full graph as JSON").required(false)),
        )
        .subcommand(
            command!("analyze")
                .about("Detect clusters, rank influence and find bridges and ghost followers")
                .arg(arg!([ID] "Graph id").required_unless_present("all"))
                .arg(
                    arg!(-a --"all" "Analyze every stored graph")
                        .required(false)
                        .conflicts_with("ID"),
                )
                .arg(
                    arg!(--"top" <COUNT>)
                        .required(false)
                        .help("Number of ranked accounts to print")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("10"),
                )
                .arg(arg!(--"json" "Print the analysis as JSON").required(false)),
        )
        .subcommand(
            command!("recommend")
                .about("Suggest accounts to follow, engage with or unfollow")
                .arg(arg!(<ID> "Graph id"))
                .arg(
                    arg!(--"competitor" <USERNAME>)
                        .required(false)
                        .help("Account to compare audiences with (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(arg!(--"json" "Print the recommendations as JSON").required(false)),
        )
        .subcommand(
            command!("visualize")
                .about("Export a graph for D3, Gephi or a browser")
                .arg(arg!(<ID> "Graph id"))
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Export format: d3, gexf, html")
                        .value_parser(["d3", "gexf", "html"])
                        .default_value("html"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Output file (default: <ID>.<extension> in the current directory)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
        .subcommand(
            command!("delete")
                .about("Delete a stored graph and its cached analysis")
                .arg(arg!(<ID> "Graph id")),
        )
}
