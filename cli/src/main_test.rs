mod tests {
    use crate::config::CliConfig;
    use crate::*;

    #[test]
    fn test_sanitize_path_allows_simple_relative() {
        let p = sanitize_path("out/loop.lkbc").expect("relative path should be allowed");
        assert_eq!(p, PathBuf::from("out/loop.lkbc"));
    }

    #[test]
    fn test_sanitize_path_rejects_parent_dir() {
        let err = sanitize_path("out/../loop.lkbc").unwrap_err();
        assert!(err.to_string().contains("'..' components"));
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitize_path_allows_absolute_unix() {
        let p = sanitize_path("/tmp/loop.lkbc").expect("absolute path should be allowed");
        assert_eq!(p, PathBuf::from("/tmp/loop.lkbc"));
    }

    #[test]
    fn test_cli_args_rejects_parent_dir_in_disasm() {
        let err = CliArgs::try_parse_from(["lkbc", "disasm", "../loop.lkbc"]).unwrap_err();
        assert!(err.to_string().contains("'..' components"));
    }

    #[test]
    fn test_cli_args_disasm_flags() {
        let args = CliArgs::try_parse_from(["lkbc", "disasm", "loop.lkbc", "--json", "--no-positions"])
            .expect("should parse");
        match args.command {
            Commands::Disasm {
                file,
                json,
                no_positions,
                no_try_blocks,
            } => {
                assert_eq!(file, PathBuf::from("loop.lkbc"));
                assert!(json);
                assert!(no_positions);
                assert!(!no_try_blocks);
            }
            other => panic!("expected disasm command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_args_global_config_after_subcommand() {
        let args = CliArgs::try_parse_from(["lkbc", "verify", "loop.lkbc", "--config", "lkbc.toml"])
            .expect("should parse");
        assert_eq!(args.config, Some(PathBuf::from("lkbc.toml")));
        assert!(matches!(args.command, Commands::Verify { .. }));
    }

    #[test]
    fn test_cli_args_requires_subcommand() {
        assert!(CliArgs::try_parse_from(["lkbc"]).is_err());
    }

    #[test]
    fn test_log_setting_parse() {
        assert_eq!(LogSetting::parse(""), LogSetting::Off);
        assert_eq!(LogSetting::parse(" off "), LogSetting::Off);
        assert_eq!(LogSetting::parse("FALSE"), LogSetting::Off);
        assert_eq!(LogSetting::parse("1"), LogSetting::Default);
        assert_eq!(LogSetting::parse("On"), LogSetting::Default);
        assert_eq!(
            LogSetting::parse(" lkbc::container=debug "),
            LogSetting::Filter("lkbc::container=debug".to_string())
        );
    }

    #[test]
    fn test_config_defaults_and_partial_toml() {
        assert_eq!(CliConfig::from_toml_str("").unwrap(), CliConfig::default());

        let cfg = CliConfig::from_toml_str("show_positions = false\n").unwrap();
        assert!(!cfg.show_positions);
        assert!(cfg.show_try_blocks);
        assert!(!cfg.json);
    }

    #[test]
    fn test_config_rejects_wrong_type() {
        let err = CliConfig::from_toml_str("json = \"yes\"\n").unwrap_err();
        assert!(err.to_string().contains("invalid lkbc config"));
    }

    #[test]
    fn test_config_load_without_path_is_default() {
        assert_eq!(CliConfig::load(None).unwrap(), CliConfig::default());
    }
}
