//! Top-level command shapes recognised by the plugin

/// What the plugin was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help,
    /// `-c --adapter`
    ConfigureAdapter,
    /// `-c --cluster-mapping`
    ConfigureClusterMapping,
    /// `-a <release> <chart> [flags]`, holding the template arguments
    Approve(Vec<String>),
    /// `install|upgrade <args>`
    Deploy(Vec<String>),
    /// Anything else goes to helm untouched
    PassThrough(Vec<String>),
    /// A plugin switch with a malformed remainder
    Incorrect,
}

impl Invocation {
    pub fn parse(args: &[String]) -> Self {
        let Some(first) = args.first() else {
            return Invocation::Help;
        };

        match first.as_str() {
            "help" | "-h" | "--help" => Invocation::Help,
            "-c" => match args.get(1).map(String::as_str) {
                Some("--adapter") if args.len() == 2 => Invocation::ConfigureAdapter,
                Some("--cluster-mapping") if args.len() == 2 => Invocation::ConfigureClusterMapping,
                _ => Invocation::Incorrect,
            },
            "-a" if args.len() > 2 => Invocation::Approve(args[1..].to_vec()),
            "-a" => Invocation::Incorrect,
            "install" | "upgrade" => Invocation::Deploy(args.to_vec()),
            _ => Invocation::PassThrough(args.to_vec()),
        }
    }

    /// Whether the cluster CLI is needed
    pub fn needs_cluster(&self) -> bool {
        !matches!(self, Invocation::Help | Invocation::Incorrect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Invocation {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        Invocation::parse(&args)
    }

    fn owned(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_help_shapes() {
        assert_eq!(parse(""), Invocation::Help);
        assert_eq!(parse("help"), Invocation::Help);
        assert_eq!(parse("-h"), Invocation::Help);
        assert_eq!(parse("--help"), Invocation::Help);
    }

    #[test]
    fn test_configuration_switches() {
        assert_eq!(parse("-c --adapter"), Invocation::ConfigureAdapter);
        assert_eq!(parse("-c --cluster-mapping"), Invocation::ConfigureClusterMapping);
        assert_eq!(parse("-c"), Invocation::Incorrect);
        assert_eq!(parse("-c --adapter extra"), Invocation::Incorrect);
        assert_eq!(parse("-c --colour"), Invocation::Incorrect);
    }

    #[test]
    fn test_approval_switch() {
        assert_eq!(
            parse("-a web ./shop -n shop"),
            Invocation::Approve(owned("web ./shop -n shop"))
        );
        assert_eq!(parse("-a ./shop"), Invocation::Incorrect);
    }

    #[test]
    fn test_deploy_and_pass_through() {
        assert_eq!(
            parse("install web ./shop"),
            Invocation::Deploy(owned("install web ./shop"))
        );
        assert_eq!(
            parse("upgrade web ./shop --wait"),
            Invocation::Deploy(owned("upgrade web ./shop --wait"))
        );
        assert_eq!(parse("list -A"), Invocation::PassThrough(owned("list -A")));
        assert!(!Invocation::Help.needs_cluster());
        assert!(parse("list").needs_cluster());
    }
}
