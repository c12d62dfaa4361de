use assert_cmd::Command;

pub fn rapport_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("rapport").expect("rapport test binary should build")
    }
}
