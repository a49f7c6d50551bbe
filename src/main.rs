fn main() {
    if let Err(err) = vtlabel::cli::run() {
        vtlabel::ui::eprintln_error(&err);
        std::process::exit(vtlabel::exit::exit_code(&err));
    }
}
