use colored::Colorize;
use commands::command_argument_builder;
use orbit::handlers::{
    OrbitPaths, handle_analyze, handle_build, handle_delete, handle_init, handle_list,
    handle_recommend, handle_show, handle_visualize, init_logging,
};

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    init_logging(chosen_command.get_flag("verbose"));

    let Some((name, primary_command)) = chosen_command.subcommand() else {
        unreachable!("clap should ensure we don't get here")
    };
    let paths = OrbitPaths::resolve(
        primary_command
            .get_one::<String>("config-dir")
            .map(String::as_str),
    );

    let result = match name {
        "init" => handle_init(primary_command),
        "build" => handle_build(primary_command, &paths, quiet).await,
        "list" => handle_list(primary_command, &paths).await,
        "show" => handle_show(primary_command, &paths).await,
        "analyze" => handle_analyze(primary_command, &paths).await,
        "recommend" => handle_recommend(primary_command, &paths).await,
        "visualize" => handle_visualize(primary_command, &paths).await,
        "delete" => handle_delete(primary_command, &paths).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
