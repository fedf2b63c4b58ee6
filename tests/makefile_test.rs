use std::fs;

use makecmd::exec::{ExecError, Executor};
use makecmd::graph::node::NodeStatus;
use makecmd::graph::topo_sort;
use makecmd::parser::{bootstrap, ParseError};
use makecmd::{ninja, Backend, CommandEvaluator, Evaluator, Flags, Graph};

#[cfg(test)]
mod tests {
    use super::*;

    const MAKEFILE: &str = "\
CC := cc
SRCS := main.c util.c
OBJS := $(SRCS:.c=.o)

.PHONY: all clean

all: app

app: $(OBJS) | build
\t$(CC) -o $@ $^

%.o: %.c
\t@$(CC) $(CFLAGS) -c $< -o $@

main.o: CFLAGS := -O2

define CLEAN
rm -f app
-rm -f $(OBJS)
endef

clean:
\t$(CLEAN)

build:
\tmkdir -p $@

main.c util.c:
\ttouch $@
";

    fn load(flags: &Flags, text: &str) -> Result<(Evaluator, CommandEvaluator, Graph), ParseError> {
        let mut ev = Evaluator::new(flags);
        let mut g = Graph::new();
        g.parse_str(&mut ev, text, "Makefile")?;
        let ce = CommandEvaluator::new(&mut ev, flags);
        Ok((ev, ce, g))
    }

    fn commands(ev: &mut Evaluator, ce: &CommandEvaluator, g: &Graph, target: &str) -> Vec<(String, bool, bool)> {
        let nodes = g.make_dep(&[target.to_string()]).unwrap();
        ce.eval(ev, &nodes[0])
            .unwrap()
            .into_iter()
            .map(|c| (c.cmd, c.echo, c.ignore_error))
            .collect()
    }

    #[test]
    fn resolves_and_expands_a_makefile() {
        let (mut ev, ce, g) = load(&Flags::default(), MAKEFILE).unwrap();
        assert_eq!(g.default_target.as_deref(), Some("all"));
        assert!(g.is_phony("clean"));

        let nodes = g.make_dep(&["all".to_string()]).unwrap();
        let order: Vec<String> = topo_sort(&nodes).iter().map(|n| n.output.clone()).collect();
        assert_eq!(order, vec!["main.c", "main.o", "util.c", "util.o", "build", "app", "all"]);

        assert_eq!(
            commands(&mut ev, &ce, &g, "app"),
            vec![("cc -o app main.o util.o".to_string(), true, false)]
        );
        assert_eq!(
            commands(&mut ev, &ce, &g, "main.o"),
            vec![("cc -O2 -c main.c -o main.o".to_string(), false, false)]
        );
        assert_eq!(
            commands(&mut ev, &ce, &g, "util.o"),
            vec![("cc  -c util.c -o util.o".to_string(), false, false)]
        );
        assert_eq!(
            commands(&mut ev, &ce, &g, "clean"),
            vec![
                ("rm -f app".to_string(), true, false),
                ("rm -f main.o util.o".to_string(), true, true),
            ]
        );
        assert!(ev.errors().is_empty());
    }

    #[test]
    fn stem_of_pattern_rules() {
        let text = "obj/%.o: src/%.c\n\techo $* $@ $< $(*D)\nsrc/x.c:\n\ttouch $@\n";
        let (mut ev, ce, g) = load(&Flags::default(), text).unwrap();
        assert_eq!(
            commands(&mut ev, &ce, &g, "obj/x.o"),
            vec![("echo x obj/x.o src/x.c .".to_string(), true, false)]
        );
    }

    #[test]
    fn target_specific_append() {
        let text = "CFLAGS = -Wall\nx.o: CFLAGS += -g\nx.o:\n\techo $(CFLAGS)\n";
        let (mut ev, ce, g) = load(&Flags::default(), text).unwrap();
        assert_eq!(commands(&mut ev, &ce, &g, "x.o")[0].0, "echo -Wall -g");
        assert_eq!(ev.expand("$(CFLAGS)").unwrap(), "-Wall");
    }

    #[test]
    fn command_line_variables_win() {
        let flags = Flags {
            cl_vars: vec!["CC=clang".to_string()],
            targets: vec!["app".to_string()],
            ..Flags::default()
        };
        let mut ev = Evaluator::new(&flags);
        bootstrap(&mut ev, &flags).unwrap();
        let mut g = Graph::new();
        g.parse_str(&mut ev, "CC := cc\n", "Makefile").unwrap();
        assert_eq!(ev.expand("$(CC) $(origin CC)").unwrap(), "clang command line");
        assert_eq!(ev.expand("$(MAKECMDGOALS) $(SHELL)").unwrap(), "app /bin/sh");
    }

    #[test]
    fn syntax_errors() {
        let flags = Flags::default();
        let err = load(&flags, "all:\n\ttrue\nfoo\n").err().unwrap();
        assert_eq!(err.to_string(), "Makefile:3: *** missing separator.  Stop.");

        let err = load(&flags, "\techo hi\n").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Makefile:1: *** recipe commences before first target.  Stop."
        );

        let err = load(&flags, "define X\nbody\n").err().unwrap();
        assert!(err.to_string().contains("unterminated `define'"));
    }

    #[test]
    fn automatic_variables_cannot_be_assigned() {
        let flags = Flags::default();
        for (text, line) in [
            ("@ := oops\nt:\n\techo $@\n", 1),
            ("@ += x\n", 1),
            ("all:\nt: @ += x\n", 2),
            ("t: <D = x\n", 1),
            ("define ^F\nx\nendef\n", 1),
        ] {
            let err = load(&flags, text).err().unwrap();
            assert!(matches!(err, ParseError::Syntax { .. }), "{}", text);
            let prefix = format!("Makefile:{}: *** cannot assign to automatic variable", line);
            assert!(err.to_string().starts_with(&prefix), "{}", err);
        }

        // Also refused once the command evaluator has registered them.
        let mut ev = Evaluator::new(&flags);
        let _ce = CommandEvaluator::new(&mut ev, &flags);
        let mut g = Graph::new();
        let err = g.parse_str(&mut ev, "x: @ := oops\n", "Makefile").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Makefile:1: *** cannot assign to automatic variable `@'.  Stop."
        );

        let (mut ev, ce, g) = load(&flags, "AT := @\nt:\n\techo $@ $(AT)\n").unwrap();
        assert_eq!(commands(&mut ev, &ce, &g, "t")[0].0, "echo t @");
    }

    #[test]
    fn writes_ninja_file() {
        let flags = Flags {
            backend: Backend::Ninja,
            ..Flags::default()
        };
        let (mut ev, ce, g) = load(&flags, MAKEFILE).unwrap();
        let nodes = g.make_dep(&["all".to_string()]).unwrap();
        let text = ninja::generate_ninja(&nodes, &mut ev, &ce).unwrap();

        assert!(text.contains("build main.o: rule1 main.c\n"));
        assert!(text.contains(" command = cc -O2 -c main.c -o main.o\n"));
        assert!(text.contains("build app: rule5 main.o util.o || build\n"));
        assert!(text.contains("build all: phony app\n"));
        assert!(text.ends_with("\ndefault all\n"));
    }

    #[tokio::test]
    async fn runs_out_of_date_recipes() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "D := {}\n$(D)/out: $(D)/in\n\tcat $< > $@\n$(D)/in:\n\techo hello > $@\n",
            dir.path().display()
        );
        let out = dir.path().join("out");
        let target = out.to_string_lossy().to_string();

        let (mut ev, ce, g) = load(&Flags::default(), &text).unwrap();
        let nodes = g.make_dep(&[target.clone()]).unwrap();

        {
            let mut exec = Executor::new(&mut ev, &ce).unwrap();
            assert!(exec.exec(&nodes).await.unwrap());
        }
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello\n");

        let mut exec = Executor::new(&mut ev, &ce).unwrap();
        assert!(!exec.exec(&nodes).await.unwrap());
        assert_eq!(
            exec.status(&target),
            Some(&NodeStatus::Complete { rebuilt: false })
        );
    }

    #[tokio::test]
    async fn failing_commands() {
        let text = ".PHONY: bad ok\nbad:\n\tfalse\nok:\n\t-false\n\ttrue\n";
        let (mut ev, ce, g) = load(&Flags::default(), text).unwrap();

        let nodes = g.make_dep(&["ok".to_string()]).unwrap();
        assert!(Executor::new(&mut ev, &ce).unwrap().exec(&nodes).await.unwrap());

        let nodes = g.make_dep(&["bad".to_string()]).unwrap();
        let err = Executor::new(&mut ev, &ce).unwrap().exec(&nodes).await.unwrap_err();
        match err {
            ExecError::CommandFailed { target, code, .. } => {
                assert_eq!(target, "bad");
                assert_eq!(code, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
