use crate::*;
use kiln::deps_log::DepsLog;
use kiln::graph::State;

/// Write a deps log recording out.o as depending on a.h and b.h.
fn write_deps_log(space: &TestSpace) -> anyhow::Result<()> {
    let mut state = State::new();
    let out = state.get_node("out.o", 0);
    let a = state.get_node("a.h", 0);
    let b = state.get_node("b.h", 0);
    let mut log = DepsLog::new();
    log.open_for_write(space.path().join(".ninja_deps"), &mut state)?;
    log.record_deps(&mut state, out, 5, &[a, b])?;
    log.close()?;
    Ok(())
}

#[test]
fn deps_lists_records() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    write_deps_log(&space)?;

    let out = space.run_expect(&mut kiln_command(vec!["deps"]))?;
    // out.o doesn't exist, so its deps are stale.
    assert_output_contains(&out, "out.o: #deps 2, deps mtime 5 (STALE)\n    a.h\n    b.h\n\n");
    assert_output_not_contains(&out, "a.h: #deps");

    let out = space.run_expect(&mut kiln_command(vec!["deps", "a.h", "nope"]))?;
    assert_output_contains(&out, "a.h: deps not found");
    assert_output_contains(&out, "nope: deps not found");
    Ok(())
}

#[test]
fn deps_valid_when_output_older() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("out.o", "")?;
    let mut state = State::new();
    let out = state.get_node("out.o", 0);
    let a = state.get_node("a.h", 0);
    let mut log = DepsLog::new();
    log.open_for_write(space.path().join(".ninja_deps"), &mut state)?;
    log.record_deps(&mut state, out, i64::MAX, &[a])?;
    log.close()?;

    let out = space.run_expect(&mut kiln_command(vec!["deps", "out.o"]))?;
    assert_output_contains(&out, "(VALID)");
    Ok(())
}

#[test]
fn deps_with_chdir() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    std::fs::create_dir(space.path().join("build"))?;
    let mut state = State::new();
    let out = state.get_node("out.o", 0);
    let a = state.get_node("a.h", 0);
    let mut log = DepsLog::new();
    log.open_for_write(space.path().join("build/.ninja_deps"), &mut state)?;
    log.record_deps(&mut state, out, 5, &[a])?;
    log.close()?;

    let out = space.run_expect(&mut kiln_command(vec!["-C", "build", "deps"]))?;
    assert_output_contains(&out, "out.o: #deps 1");
    Ok(())
}

#[test]
fn restat_rewrites_mtimes() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(".ninja_log", "# ninja log v5\n0\t1\t1\tout\tabc\n0\t1\t1\tgone\tdef\n")?;
    space.write("out", "")?;

    space.run_expect(&mut kiln_command(vec!["restat", "out"]))?;
    let log = String::from_utf8(space.read(".ninja_log")?)?;
    let mut lines = log.lines();
    assert_eq!(lines.next(), Some("# ninja log v5"));
    // Entries are written sorted by output.
    assert_eq!(lines.next(), Some("0\t1\t1\tgone\tdef"));
    let out_line: Vec<&str> = lines.next().unwrap_or_default().split('\t').collect();
    assert_eq!(out_line[3], "out");
    assert_ne!(out_line[2], "1");
    Ok(())
}

#[test]
fn recompact_drops_missing_outputs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        ".ninja_log",
        "# ninja log v5\n0\t1\t1\there\tabc\n0\t1\t1\tgone\tdef\n0\t2\t2\there\tabc\n",
    )?;
    space.write("here", "")?;

    space.run_expect(&mut kiln_command(vec!["recompact"]))?;
    let log = String::from_utf8(space.read(".ninja_log")?)?;
    assert_eq!(log, "# ninja log v5\n0\t2\t2\there\tabc\n");
    Ok(())
}

#[test]
fn missing_logs_are_fine() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.run_expect(&mut kiln_command(vec!["recompact"]))?;
    space.run_expect(&mut kiln_command(vec!["restat"]))?;
    let out = space.run_expect(&mut kiln_command(vec!["deps"]))?;
    assert!(out.stdout.is_empty());
    Ok(())
}

#[test]
fn unknown_debug_tool() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut kiln_command(vec!["-d", "bogus", "deps"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "kiln: error: unknown -d \"bogus\"");

    let out = space.run(&mut kiln_command(vec!["-d", "list"]))?;
    assert_output_contains(&out, "explain");
    Ok(())
}
